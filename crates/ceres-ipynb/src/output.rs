//! Cell outputs.

use serde::{Deserialize, Serialize};

use crate::multiline;

/// Mime-type keyed output data (`text/plain`, `text/html`, ...).
pub type MimeBundle = serde_json::Map<String, serde_json::Value>;

/// A single recorded output of a code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type")]
pub enum Output {
    /// Standard output/error text.
    #[serde(rename = "stream")]
    Stream {
        name: String,
        #[serde(with = "multiline")]
        text: String,
    },

    /// Value of the last expression of a cell.
    #[serde(rename = "execute_result")]
    ExecuteResult {
        execution_count: Option<u32>,
        data: MimeBundle,
        #[serde(default)]
        metadata: MimeBundle,
    },

    /// Rich display data.
    #[serde(rename = "display_data")]
    DisplayData {
        data: MimeBundle,
        #[serde(default)]
        metadata: MimeBundle,
    },

    /// Exception raised by the cell.
    #[serde(rename = "error")]
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl Output {
    /// Create a stream output.
    pub fn stream(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Stream {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Create an execute result holding only a plain-text representation.
    pub fn execute_result(execution_count: Option<u32>, text_plain: impl Into<String>) -> Self {
        let mut data = MimeBundle::new();
        data.insert(
            "text/plain".to_string(),
            serde_json::Value::String(text_plain.into()),
        );
        Self::ExecuteResult {
            execution_count,
            data,
            metadata: MimeBundle::new(),
        }
    }

    /// Create an error output.
    pub fn error(
        ename: impl Into<String>,
        evalue: impl Into<String>,
        traceback: Vec<String>,
    ) -> Self {
        Self::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        }
    }

    /// The `output_type` tag as written on disk.
    pub fn output_type(&self) -> &'static str {
        match self {
            Self::Stream { .. } => "stream",
            Self::ExecuteResult { .. } => "execute_result",
            Self::DisplayData { .. } => "display_data",
            Self::Error { .. } => "error",
        }
    }

    /// Plain-text rendering of this output.
    ///
    /// Streams yield their raw text, results their `text/plain`
    /// representation, and errors their traceback lines joined by newlines.
    pub fn text(&self) -> String {
        match self {
            Self::Stream { text, .. } => text.clone(),
            Self::ExecuteResult { data, .. } | Self::DisplayData { data, .. } => data
                .get("text/plain")
                .and_then(multiline::join_value)
                .unwrap_or_default(),
            Self::Error { traceback, .. } => traceback.join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_result_text() {
        let output = Output::execute_result(Some(1), "4");
        assert_eq!(output.text(), "4");
        assert_eq!(output.output_type(), "execute_result");
    }

    #[test]
    fn test_error_text_joins_traceback() {
        let output = Output::error(
            "ValueError",
            "boom",
            vec!["Traceback (most recent call last):".into(), "ValueError: boom".into()],
        );
        assert_eq!(
            output.text(),
            "Traceback (most recent call last):\nValueError: boom"
        );
    }

    #[test]
    fn test_text_plain_as_line_list() {
        let json = serde_json::json!({
            "output_type": "execute_result",
            "execution_count": 3,
            "data": {"text/plain": ["[1,\n", " 2]"]},
            "metadata": {}
        });
        let output: Output = serde_json::from_value(json).unwrap();
        assert_eq!(output.text(), "[1,\n 2]");
    }

    #[test]
    fn test_stream_serialization_shape() {
        let json = serde_json::to_value(Output::stream("stdout", "a\n")).unwrap();
        assert_eq!(json["output_type"], "stream");
        assert_eq!(json["name"], "stdout");
        assert_eq!(json["text"], serde_json::json!(["a\n"]));
    }

    #[test]
    fn test_display_data_without_text_plain() {
        let mut data = MimeBundle::new();
        data.insert("image/png".into(), serde_json::json!("iVBORw0KGgo="));
        let output = Output::DisplayData {
            data,
            metadata: MimeBundle::new(),
        };
        assert_eq!(output.text(), "");
    }
}
