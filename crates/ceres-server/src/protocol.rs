//! Request and response bodies.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use ceres_core::CellKind;

/// `POST /create_notebook`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotebookRequest {
    /// Directory to create the notebook in. Created if missing.
    pub directory: PathBuf,
    /// File name; `.ipynb` is appended when it has no extension.
    pub name: String,
}

/// Any request naming a single notebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookRequest {
    pub filepath: PathBuf,
}

/// `POST /add_cell`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCellRequest {
    pub filepath: PathBuf,
    pub cell_type: CellKind,
    #[serde(default)]
    pub source: String,
}

/// `POST /update_cell`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCellRequest {
    pub filepath: PathBuf,
    pub cell_id: String,
    pub source: String,
}

/// `POST /execute_cell`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCellRequest {
    pub filepath: PathBuf,
    pub cell_id: String,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Number of open notebooks.
    pub notebooks: usize,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind, e.g. `unknown_cell`.
    pub error: String,
    pub message: String,
}
