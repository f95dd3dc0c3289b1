//! Cell identity to position mapping.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::cell::CellId;

/// Bidirectional, append-only map between cell ids and positions.
///
/// For every registered id, `id_at(resolve(id)) == id`.
#[derive(Debug, Clone, Default)]
pub struct CellIndex {
    positions: FxHashMap<CellId, usize>,
    ids: Vec<CellId>,
}

impl CellIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` at `position`, which must equal the current length.
    pub fn add(&mut self, id: CellId, position: usize) -> Result<()> {
        if self.positions.contains_key(&id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        if position != self.ids.len() {
            return Err(Error::OutOfRange {
                position,
                len: self.ids.len(),
            });
        }
        self.positions.insert(id.clone(), position);
        self.ids.push(id);
        Ok(())
    }

    /// Position of `id`.
    pub fn resolve(&self, id: &str) -> Result<usize> {
        self.positions
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownCell(id.to_string()))
    }

    /// Id registered at `position`.
    pub fn id_at(&self, position: usize) -> Result<&CellId> {
        self.ids.get(position).ok_or(Error::OutOfRange {
            position,
            len: self.ids.len(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in position order.
    pub fn ids(&self) -> &[CellId] {
        &self.ids
    }
}
