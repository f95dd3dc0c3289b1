//! Notebook and cell structures.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, FormatResult};
use crate::multiline;
use crate::output::{MimeBundle, Output};

/// Major format version written and accepted.
const NBFORMAT: u32 = 4;

/// Minor format version written. 4.5 introduced cell ids.
const NBFORMAT_MINOR: u32 = 5;

/// Longest cell id allowed by nbformat.
const MAX_CELL_ID_LEN: usize = 64;

/// A Jupyter notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JupyterNotebook {
    /// Notebook metadata
    #[serde(default)]
    pub metadata: JupyterMetadata,

    /// Format version (always 4)
    pub nbformat: u32,

    /// Minor format version
    pub nbformat_minor: u32,

    /// Notebook cells
    pub cells: Vec<JupyterCell>,
}

/// Jupyter notebook metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JupyterMetadata {
    /// Kernel specification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernelspec: Option<KernelSpec>,

    /// Language info
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_info: Option<LanguageInfo>,

    /// Ceres-specific metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceres: Option<CeresMetadata>,

    /// Metadata written by other tools, kept as-is.
    #[serde(flatten)]
    pub extra: MimeBundle,
}

/// Kernel specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Display name
    pub display_name: String,

    /// Language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Kernel name
    pub name: String,
}

/// Language information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    /// Language name
    pub name: String,

    /// File extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,

    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
}

/// Ceres-specific metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CeresMetadata {
    /// Version of ceres that last wrote the file
    pub version: String,
}

/// A notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "snake_case")]
pub enum JupyterCell {
    /// Executable code.
    Code {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        metadata: MimeBundle,
        #[serde(with = "multiline")]
        source: String,
        #[serde(default)]
        outputs: Vec<Output>,
        #[serde(default)]
        execution_count: Option<u32>,
    },

    /// Narrative text.
    Markdown {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        metadata: MimeBundle,
        #[serde(with = "multiline")]
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<serde_json::Value>,
    },

    /// Unrendered content.
    Raw {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        metadata: MimeBundle,
        #[serde(with = "multiline")]
        source: String,
    },
}

impl JupyterCell {
    /// Create a code cell with no outputs.
    pub fn code(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self::Code {
            id: Some(id.into()),
            metadata: MimeBundle::new(),
            source: source.into(),
            outputs: Vec::new(),
            execution_count: None,
        }
    }

    /// Create a markdown cell.
    pub fn markdown(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self::Markdown {
            id: Some(id.into()),
            metadata: MimeBundle::new(),
            source: source.into(),
            attachments: None,
        }
    }

    /// The `cell_type` tag as written on disk.
    pub fn cell_type(&self) -> &'static str {
        match self {
            Self::Code { .. } => "code",
            Self::Markdown { .. } => "markdown",
            Self::Raw { .. } => "raw",
        }
    }

    /// Cell id, if the file carried one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Code { id, .. } | Self::Markdown { id, .. } | Self::Raw { id, .. } => {
                id.as_deref()
            }
        }
    }

    /// Replace the cell id.
    pub fn set_id(&mut self, new_id: impl Into<String>) {
        match self {
            Self::Code { id, .. } | Self::Markdown { id, .. } | Self::Raw { id, .. } => {
                *id = Some(new_id.into());
            }
        }
    }

    /// Cell source text.
    pub fn source(&self) -> &str {
        match self {
            Self::Code { source, .. } | Self::Markdown { source, .. } | Self::Raw { source, .. } => {
                source
            }
        }
    }

    /// Recorded outputs. Empty for non-code cells.
    pub fn outputs(&self) -> &[Output] {
        match self {
            Self::Code { outputs, .. } => outputs,
            _ => &[],
        }
    }

    /// Execution counter of a code cell.
    pub fn execution_count(&self) -> Option<u32> {
        match self {
            Self::Code {
                execution_count, ..
            } => *execution_count,
            _ => None,
        }
    }
}

/// Whether `id` is acceptable as an nbformat 4.5 cell id.
pub fn is_valid_cell_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CELL_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl JupyterNotebook {
    /// Create a new empty notebook.
    pub fn new() -> Self {
        Self {
            metadata: JupyterMetadata::default(),
            nbformat: NBFORMAT,
            nbformat_minor: NBFORMAT_MINOR,
            cells: Vec::new(),
        }
    }

    /// Serialize to the JSON text written on disk.
    pub fn to_json(&self) -> FormatResult<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Write the notebook to a file.
    ///
    /// The file is replaced atomically: content goes to a sibling temp file
    /// which is synced and then renamed over `path`. A failed write leaves
    /// the previous file untouched.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> FormatResult<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let write_error = |e: std::io::Error| FormatError::WriteError {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let temp_path = temp_path(path).ok_or_else(|| FormatError::WriteError {
            path: path.to_path_buf(),
            message: "path has no file name".to_string(),
        })?;
        let result = (|| {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(write_error(e));
        }

        tracing::debug!(
            "Wrote {} ({} cells, {} bytes)",
            path.display(),
            self.cells.len(),
            json.len()
        );
        Ok(())
    }

    /// Read a notebook from a file.
    pub fn read_from_file(path: impl AsRef<Path>) -> FormatResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| FormatError::ReadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| e.in_file(path))
    }

    /// Parse notebook JSON.
    pub fn from_json(content: &str) -> FormatResult<Self> {
        let notebook: Self = serde_json::from_str(content)?;
        if notebook.nbformat != NBFORMAT {
            return Err(FormatError::InvalidNotebook(format!(
                "unsupported nbformat {}.{} (expected {})",
                notebook.nbformat, notebook.nbformat_minor, NBFORMAT
            )));
        }
        Ok(notebook)
    }

    /// Mark the notebook as last written by this version.
    ///
    /// Readers that predate cell ids are bumped to minor version 5.
    pub fn stamp(&mut self) {
        self.nbformat_minor = self.nbformat_minor.max(NBFORMAT_MINOR);
        self.metadata.ceres = Some(CeresMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
        });
    }
}

/// Hidden sibling used while replacing `path`: `dir/.name.ext.tmp`.
///
/// Built from the whole file name so distinct notebooks never share one.
fn temp_path(path: &Path) -> Option<PathBuf> {
    let mut name = OsString::from(".");
    name.push(path.file_name()?);
    name.push(".tmp");
    Some(path.with_file_name(name))
}

impl Default for JupyterNotebook {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for JupyterMetadata {
    fn default() -> Self {
        Self {
            kernelspec: Some(KernelSpec {
                display_name: "Python 3".to_string(),
                language: Some("python".to_string()),
                name: "python3".to_string(),
            }),
            language_info: Some(LanguageInfo {
                name: "python".to_string(),
                file_extension: Some(".py".to_string()),
                mimetype: Some("text/x-python".to_string()),
            }),
            ceres: Some(CeresMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
            extra: MimeBundle::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_notebook() {
        let notebook = JupyterNotebook::new();
        assert_eq!(notebook.nbformat, 4);
        assert_eq!(notebook.nbformat_minor, 5);
        assert!(notebook.cells.is_empty());
    }

    #[test]
    fn test_code_cell_shape() {
        let cell = JupyterCell::code("abc123", "2 + 2");
        let json = serde_json::to_value(&cell).unwrap();

        assert_eq!(json["cell_type"], "code");
        assert_eq!(json["id"], "abc123");
        assert_eq!(json["source"], serde_json::json!(["2 + 2"]));
        assert_eq!(json["outputs"], serde_json::json!([]));
        assert!(json["execution_count"].is_null());
    }

    #[test]
    fn test_markdown_cell_has_no_outputs() {
        let cell = JupyterCell::markdown("m1", "# Title");
        let json = serde_json::to_value(&cell).unwrap();

        assert_eq!(json["cell_type"], "markdown");
        assert!(json.get("outputs").is_none());
        assert!(json.get("execution_count").is_none());
        assert!(cell.outputs().is_empty());
    }

    #[test]
    fn test_valid_cell_ids() {
        assert!(is_valid_cell_id("a1b2c3d4"));
        assert!(is_valid_cell_id("with-dash_and_underscore"));
        assert!(!is_valid_cell_id(""));
        assert!(!is_valid_cell_id("has space"));
        assert!(!is_valid_cell_id(&"x".repeat(65)));
    }

    #[test]
    fn test_rejects_nbformat_3() {
        let err = JupyterNotebook::from_json(
            r#"{"metadata": {}, "nbformat": 3, "nbformat_minor": 0, "cells": []}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FormatError::InvalidNotebook(_)));
    }

    #[test]
    fn test_write_and_read_back() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nb.ipynb");

        let mut notebook = JupyterNotebook::new();
        notebook.cells.push(JupyterCell::code("c1", "x = 1\nx"));
        notebook.write_to_file(&path).unwrap();

        let read = JupyterNotebook::read_from_file(&path).unwrap();
        assert_eq!(read, notebook);
        assert!(!temp_path(&path).unwrap().exists());
    }

    #[test]
    fn test_temp_path_is_unique_per_file() {
        let a = temp_path(Path::new("/data/nb.ipynb")).unwrap();
        let b = temp_path(Path::new("/data/nb.txt")).unwrap();
        assert_eq!(a, PathBuf::from("/data/.nb.ipynb.tmp"));
        assert_ne!(a, b);
        assert_ne!(
            temp_path(Path::new("/data/nb.json")),
            temp_path(Path::new("/data/nb.v2"))
        );
        assert!(temp_path(Path::new("/")).is_none());
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("missing").join("nb.ipynb");

        let err = JupyterNotebook::new().write_to_file(&path).unwrap_err();
        assert!(matches!(err, FormatError::WriteError { .. }));
        assert_eq!(err.path(), Some(path.as_path()));
    }
}
