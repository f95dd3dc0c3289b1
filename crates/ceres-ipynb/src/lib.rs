//! Jupyter notebook (`.ipynb`) document model.
//!
//! Reads and writes nbformat 4.5 JSON. Cell ids live in the standard
//! top-level `id` field of each cell, so a notebook written here can be
//! reopened with the same cell identities.
//!
//! # Layout
//!
//! ```text
//! JupyterNotebook
//! ├── metadata (kernelspec, language_info, ceres)
//! └── cells: [JupyterCell]
//!        ├── Code     { id, source, outputs: [Output], execution_count }
//!        ├── Markdown { id, source }
//!        └── Raw      { id, source }
//! ```

mod error;
mod multiline;
mod notebook;
mod output;

pub use error::{FormatError, FormatResult};
pub use notebook::{
    CeresMetadata, JupyterCell, JupyterMetadata, JupyterNotebook, KernelSpec, LanguageInfo,
    is_valid_cell_id,
};
pub use output::{MimeBundle, Output};
