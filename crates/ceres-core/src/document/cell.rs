//! Cell types.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ceres_ipynb::{JupyterCell, Output};

/// Opaque, stable identity of a cell within its document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CellId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a cell holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    /// Source executed by the kernel.
    Code,
    /// Narrative text. Stored as a markdown cell.
    #[serde(alias = "markdown")]
    Text,
}

impl CellKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Text => "text",
        }
    }

    pub(crate) fn of(cell: &JupyterCell) -> Self {
        match cell {
            JupyterCell::Code { .. } => Self::Code,
            JupyterCell::Markdown { .. } | JupyterCell::Raw { .. } => Self::Text,
        }
    }

    /// A stored cell of this kind.
    pub(crate) fn new_stored(self, id: &CellId, source: &str) -> JupyterCell {
        match self {
            Self::Code => JupyterCell::code(id.as_str(), source),
            Self::Text => JupyterCell::markdown(id.as_str(), source),
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cell of a document, as last persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    pub source: String,
    /// Outputs of the last execution, in event order.
    pub outputs: Vec<Output>,
    pub execution_count: Option<u32>,
}

impl Cell {
    pub(crate) fn from_stored(cell: &JupyterCell) -> Self {
        Self {
            id: CellId::new(cell.id().unwrap_or_default()),
            kind: CellKind::of(cell),
            source: cell.source().to_string(),
            outputs: cell.outputs().to_vec(),
            execution_count: cell.execution_count(),
        }
    }

    /// Outputs as plain text fragments, one per output.
    pub fn output_text(&self) -> Vec<String> {
        self.outputs.iter().map(Output::text).collect()
    }

    /// Identity view of this cell in the document at `path`.
    pub fn snapshot(&self, path: &Path) -> CellSnapshot {
        CellSnapshot {
            id: self.id.clone(),
            cell_type: self.kind,
            source: self.source.clone(),
            filepath: path.to_path_buf(),
        }
    }

    /// This cell with its outputs rendered as text.
    pub fn with_output(&self, path: &Path) -> CellWithOutput {
        CellWithOutput {
            cell: self.snapshot(path),
            execution_count: self.execution_count,
            output: self.output_text(),
        }
    }
}

/// A cell without outputs, as returned when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub id: CellId,
    pub cell_type: CellKind,
    pub source: String,
    pub filepath: PathBuf,
}

/// A cell together with the text of its recorded outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellWithOutput {
    #[serde(flatten)]
    pub cell: CellSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u32>,
    pub output: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_accepts_markdown_alias() {
        let kind: CellKind = serde_json::from_str("\"markdown\"").unwrap();
        assert_eq!(kind, CellKind::Text);
        let kind: CellKind = serde_json::from_str("\"code\"").unwrap();
        assert_eq!(kind, CellKind::Code);
        assert!(serde_json::from_str::<CellKind>("\"heading\"").is_err());
        assert_eq!(serde_json::to_string(&CellKind::Text).unwrap(), "\"text\"");
    }

    #[test]
    fn test_with_output_shape() {
        let cell = Cell {
            id: CellId::new("abc12345"),
            kind: CellKind::Code,
            source: "print('a')".to_string(),
            outputs: vec![Output::stream("stdout", "a\n"), Output::execute_result(Some(1), "4")],
            execution_count: Some(1),
        };

        let json = serde_json::to_value(cell.with_output(Path::new("/tmp/nb.ipynb"))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "abc12345",
                "cell_type": "code",
                "source": "print('a')",
                "filepath": "/tmp/nb.ipynb",
                "execution_count": 1,
                "output": ["a\n", "4"],
            })
        );
    }

    #[test]
    fn test_stored_raw_cell_reads_as_text() {
        let raw: JupyterCell = serde_json::from_value(serde_json::json!({
            "cell_type": "raw",
            "id": "r1",
            "metadata": {},
            "source": "raw text",
        }))
        .unwrap();
        let cell = Cell::from_stored(&raw);
        assert_eq!(cell.kind, CellKind::Text);
        assert_eq!(cell.id.as_str(), "r1");
        assert!(cell.outputs.is_empty());
    }
}
