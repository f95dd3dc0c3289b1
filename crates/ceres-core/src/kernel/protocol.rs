//! Kernel wire protocol.
//!
//! Newline-delimited JSON over the kernel's stdin (requests) and stdout
//! (events). Every message carries a Jupyter-shaped envelope:
//!
//! ```text
//! {"header": {"msg_id", "msg_type"}, "parent_header": {"msg_id"}, "content": {...}}
//! ```
//!
//! Events name the request they belong to in `parent_header.msg_id`.

use serde::{Deserialize, Serialize};

use ceres_ipynb::{MimeBundle, Output};

use crate::error::{Error, Result};

/// Message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Unique id of this message.
    pub msg_id: String,
    /// Message type (`execute_request`, `status`, `stream`, ...).
    pub msg_type: String,
}

/// Header of the request an event answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentHeader {
    /// Correlation id. Absent on unsolicited events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
}

/// A message in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelMessage {
    pub header: Header,
    #[serde(default)]
    pub parent_header: ParentHeader,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl KernelMessage {
    /// Build a request with a fresh correlation id.
    pub fn request(msg_type: &str, content: serde_json::Value) -> Self {
        Self {
            header: Header {
                msg_id: uuid::Uuid::new_v4().to_string(),
                msg_type: msg_type.to_string(),
            },
            parent_header: ParentHeader::default(),
            content,
        }
    }

    /// `execute_request` for a block of source.
    pub fn execute_request(code: &str) -> Self {
        Self::request("execute_request", serde_json::json!({ "code": code }))
    }

    /// `kernel_info_request`, used as the readiness probe.
    pub fn kernel_info_request() -> Self {
        Self::request("kernel_info_request", serde_json::json!({}))
    }

    /// `shutdown_request`.
    pub fn shutdown_request() -> Self {
        Self::request("shutdown_request", serde_json::json!({ "restart": false }))
    }

    /// Build an event answering `parent`.
    pub fn reply(parent: &str, msg_type: &str, content: serde_json::Value) -> Self {
        Self {
            header: Header {
                msg_id: uuid::Uuid::new_v4().to_string(),
                msg_type: msg_type.to_string(),
            },
            parent_header: ParentHeader {
                msg_id: Some(parent.to_string()),
            },
            content,
        }
    }

    /// Correlation id of this message.
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// Message type.
    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Correlation id of the request this event answers.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_header.msg_id.as_deref()
    }

    /// Encode as one protocol line (without the trailing newline).
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Kernel(format!("failed to encode {} message: {}", self.msg_type(), e)))
    }

    /// Decode one protocol line.
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| Error::Kernel(format!("invalid kernel message: {}", e)))
    }
}

/// Kernel execution state reported by `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Starting,
    Busy,
    Idle,
    /// Any state this engine does not act on.
    #[serde(other)]
    Unknown,
}

/// A classified event.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelEvent {
    /// Execution-state change. `Idle` terminates a correlation.
    Status(ExecutionState),
    /// A computed value.
    ExecuteResult {
        execution_count: Option<u32>,
        data: MimeBundle,
    },
    /// Incremental text output.
    Stream { name: String, text: String },
    /// An exception.
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    /// Anything else (`execute_input`, `display_data`, replies, ...).
    Other(String),
}

#[derive(Deserialize)]
struct StatusContent {
    execution_state: ExecutionState,
}

#[derive(Deserialize)]
struct ExecuteResultContent {
    #[serde(default)]
    execution_count: Option<u32>,
    data: MimeBundle,
}

#[derive(Deserialize)]
struct StreamContent {
    #[serde(default = "default_stream_name")]
    name: String,
    text: String,
}

fn default_stream_name() -> String {
    "stdout".to_string()
}

#[derive(Deserialize)]
struct ErrorContent {
    #[serde(default)]
    ename: String,
    #[serde(default)]
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

impl KernelEvent {
    /// Classify a message by its type, decoding the kind-specific content.
    pub fn classify(message: &KernelMessage) -> Result<Self> {
        let content = message.content.clone();
        let malformed = |e: serde_json::Error| {
            Error::Kernel(format!("malformed {} event: {}", message.msg_type(), e))
        };

        Ok(match message.msg_type() {
            "status" => {
                let c: StatusContent = serde_json::from_value(content).map_err(malformed)?;
                Self::Status(c.execution_state)
            }
            "execute_result" => {
                let c: ExecuteResultContent = serde_json::from_value(content).map_err(malformed)?;
                Self::ExecuteResult {
                    execution_count: c.execution_count,
                    data: c.data,
                }
            }
            "stream" => {
                let c: StreamContent = serde_json::from_value(content).map_err(malformed)?;
                Self::Stream {
                    name: c.name,
                    text: c.text,
                }
            }
            "error" => {
                let c: ErrorContent = serde_json::from_value(content).map_err(malformed)?;
                Self::Error {
                    ename: c.ename,
                    evalue: c.evalue,
                    traceback: c.traceback,
                }
            }
            other => Self::Other(other.to_string()),
        })
    }

    /// Whether this event ends its correlation.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Status(ExecutionState::Idle))
    }

    /// The recorded output for this event, if it is one.
    pub fn into_output(self) -> Option<Output> {
        match self {
            Self::ExecuteResult {
                execution_count,
                data,
            } => Some(Output::ExecuteResult {
                execution_count,
                data,
                metadata: MimeBundle::new(),
            }),
            Self::Stream { name, text } => Some(Output::Stream { name, text }),
            Self::Error {
                ename,
                evalue,
                traceback,
            } => Some(Output::Error {
                ename,
                evalue,
                traceback,
            }),
            Self::Status(_) | Self::Other(_) => None,
        }
    }
}
