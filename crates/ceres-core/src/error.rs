//! Error types for ceres-core.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type for ceres-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ceres-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading or writing a document file failed.
    #[error("storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    /// No open document at this path.
    #[error("document not found: {0}")]
    DocumentNotFound(PathBuf),

    /// A document is already open at this path.
    #[error("document already open: {0}")]
    DocumentExists(PathBuf),

    /// No cell with this id in the document.
    #[error("cell not found: {0}")]
    UnknownCell(String),

    /// Position outside the cell sequence.
    #[error("cell position {position} out of range (document has {len} cells)")]
    OutOfRange { position: usize, len: usize },

    /// Cell id already registered, or no free id could be generated.
    #[error("duplicate cell id: {0}")]
    DuplicateId(String),

    /// The interpreter could not be launched or never became ready.
    #[error("kernel failed to start: {0}")]
    KernelStart(String),

    /// The interpreter did not finish an execution within its budget.
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// Channel or protocol failure with a running kernel.
    #[error("kernel error: {0}")]
    Kernel(String),
}

/// Stable, transport-friendly name of an error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Storage,
    DocumentNotFound,
    DocumentExists,
    UnknownCell,
    OutOfRange,
    DuplicateId,
    KernelStart,
    ExecutionTimeout,
    Kernel,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::DocumentNotFound => "document_not_found",
            Self::DocumentExists => "document_exists",
            Self::UnknownCell => "unknown_cell",
            Self::OutOfRange => "out_of_range",
            Self::DuplicateId => "duplicate_id",
            Self::KernelStart => "kernel_start",
            Self::ExecutionTimeout => "execution_timeout",
            Self::Kernel => "kernel",
        }
    }
}

impl Error {
    /// Build a storage error for `path`.
    pub fn storage(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { .. } => ErrorKind::Storage,
            Self::DocumentNotFound(_) => ErrorKind::DocumentNotFound,
            Self::DocumentExists(_) => ErrorKind::DocumentExists,
            Self::UnknownCell(_) => ErrorKind::UnknownCell,
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::DuplicateId(_) => ErrorKind::DuplicateId,
            Self::KernelStart(_) => ErrorKind::KernelStart,
            Self::ExecutionTimeout(_) => ErrorKind::ExecutionTimeout,
            Self::Kernel(_) => ErrorKind::Kernel,
        }
    }

    /// Whether the caller supplied an invalid reference.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::DocumentNotFound(_)
                | Self::DocumentExists(_)
                | Self::UnknownCell(_)
                | Self::OutOfRange { .. }
        )
    }
}

impl From<ceres_ipynb::FormatError> for Error {
    fn from(e: ceres_ipynb::FormatError) -> Self {
        let path = e.path().map(|p| p.to_path_buf()).unwrap_or_default();
        Self::Storage {
            path,
            message: e.to_string(),
        }
    }
}
