//! Document path construction.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Extension given to notebook names that have none.
pub const NOTEBOOK_EXTENSION: &str = "ipynb";

/// Build the storage path for a new document.
///
/// Creates `location` if it does not exist and canonicalizes it, so the
/// returned path is absolute and stable as a registry key. `name` must be a
/// plain file name; `.ipynb` is appended when it has no extension.
pub fn document_path(location: &Path, name: &str) -> Result<PathBuf> {
    let file_name = Path::new(name);
    let is_plain = !name.trim().is_empty()
        && file_name.components().count() == 1
        && file_name.file_name().is_some_and(|f| f == file_name.as_os_str());
    if !is_plain {
        return Err(Error::storage(
            location.join(name),
            "notebook name must be a plain file name",
        ));
    }

    fs::create_dir_all(location).map_err(|e| Error::storage(location, e))?;
    let location = location
        .canonicalize()
        .map_err(|e| Error::storage(location, e))?;

    let mut path = location.join(file_name);
    if path.extension().is_none() {
        path.set_extension(NOTEBOOK_EXTENSION);
    }
    Ok(path)
}

/// Canonicalize the path of an existing document file.
pub fn existing_document_path(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| Error::storage(path, e))
}
