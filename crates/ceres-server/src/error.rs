//! Error types for the ceres server.

use std::path::PathBuf;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use ceres_core::ErrorKind;

use crate::protocol::ErrorBody;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Host and port do not form a socket address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Engine error.
    #[error(transparent)]
    Core(#[from] ceres_core::Error),

    /// Request body or query could not be decoded.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(e) => match e.kind() {
                ErrorKind::DocumentNotFound | ErrorKind::UnknownCell => StatusCode::NOT_FOUND,
                ErrorKind::OutOfRange => StatusCode::BAD_REQUEST,
                ErrorKind::DocumentExists => StatusCode::CONFLICT,
                ErrorKind::ExecutionTimeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Io { .. } | Self::InvalidAddress(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Core(e) => e.kind().as_str(),
            Self::InvalidRequest(_) => "invalid_request",
            Self::Io { .. } => "io",
            Self::InvalidAddress(_) => "invalid_address",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(e: JsonRejection) -> Self {
        Self::InvalidRequest(e.body_text())
    }
}

impl From<QueryRejection> for ServerError {
    fn from(e: QueryRejection) -> Self {
        Self::InvalidRequest(e.body_text())
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
