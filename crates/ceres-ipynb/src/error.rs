//! Error types for the notebook format.

use std::path::{Path, PathBuf};

/// Result type for format operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors that can occur while reading or writing a notebook file.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Failed to read the notebook file.
    #[error("Failed to read file {path}: {message}")]
    ReadError { path: PathBuf, message: String },

    /// Failed to write the notebook file.
    #[error("Failed to write file {path}: {message}")]
    WriteError { path: PathBuf, message: String },

    /// A notebook file could not be parsed.
    #[error("Failed to parse {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    /// Failed to serialize/deserialize JSON.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The file parsed as JSON but is not a notebook we can handle.
    #[error("Invalid notebook: {0}")]
    InvalidNotebook(String),
}

impl FormatError {
    /// Path the error refers to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::ReadError { path, .. }
            | Self::WriteError { path, .. }
            | Self::ParseError { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Attach the file a content error came from.
    pub(crate) fn in_file(self, path: &Path) -> Self {
        if matches!(self, Self::JsonError(_) | Self::InvalidNotebook(_)) {
            Self::ParseError {
                path: path.to_path_buf(),
                message: self.to_string(),
            }
        } else {
            self
        }
    }
}
