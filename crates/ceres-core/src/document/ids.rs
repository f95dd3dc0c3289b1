//! Cell id generation.

use ceres_ipynb::is_valid_cell_id;

use crate::error::{Error, Result};

use super::cell::CellId;

/// Attempts at drawing an unused id before giving up.
pub const MAX_ID_ATTEMPTS: usize = 16;

/// Length of generated ids.
const ID_LEN: usize = 8;

/// Source of candidate cell ids.
pub trait IdGenerator: Send + Sync {
    /// A candidate id. Need not be unique; callers retry on collision.
    fn generate(&self) -> String;
}

/// Random 8-character lowercase ids taken from a v4 UUID.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn generate(&self) -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(ID_LEN);
        id
    }
}

/// Draw an id for which `taken` is false.
///
/// Fails with `DuplicateId` after `MAX_ID_ATTEMPTS` collisions.
pub(crate) fn fresh_id(ids: &dyn IdGenerator, taken: impl Fn(&str) -> bool) -> Result<CellId> {
    let mut last = String::new();
    for _ in 0..MAX_ID_ATTEMPTS {
        let candidate = ids.generate();
        if is_valid_cell_id(&candidate) && !taken(&candidate) {
            return Ok(CellId::new(candidate));
        }
        tracing::debug!(candidate, "Cell id collision, retrying");
        last = candidate;
    }
    Err(Error::DuplicateId(last))
}
