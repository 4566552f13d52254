//! Request-level errors and the JSON error envelope.
//!
//! Every failure a client can see is `{error, requestId, timestamp}` with an
//! appropriate status code. Internals (messages, sources, panic payloads) go
//! to the log only.
//!
//! Fallible handlers return `Result<T, AppErrorResponse>` and tag their
//! errors with [`ResultExt::with_request_id`]:
//!
//! ```ignore
//! async fn export(Extension(request_id): Extension<RequestId>) -> Result<String, AppErrorResponse> {
//!     std::fs::read_to_string("/data/export.json").with_request_id(&request_id)
//! }
//! ```
//!
//! `Io` and `Internal` cover what such handlers hit; the built-in routes
//! only produce `RouteNotFound` and, through the panic boundary, `Panic`.

use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::io;

use crate::log_error;
use crate::middleware::RequestId;
use crate::routes::timestamp;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Route not found: {method} {path}")]
    RouteNotFound { method: Method, path: String },

    #[error("Handler panicked at {location}: {message}")]
    Panic { message: String, location: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients; never derived from the error's contents.
    pub fn public_message(&self) -> &'static str {
        match self {
            AppError::RouteNotFound { .. } => "Not Found",
            _ => "Internal Server Error",
        }
    }
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub request_id: String,
    pub timestamp: String,
}

/// An [`AppError`] bound to the request it happened in.
#[derive(Debug)]
pub struct AppErrorResponse {
    pub error: AppError,
    pub request_id: RequestId,
}

impl AppErrorResponse {
    pub fn new(error: AppError, request_id: RequestId) -> Self {
        Self { error, request_id }
    }
}

impl IntoResponse for AppErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status();

        match &self.error {
            AppError::RouteNotFound { method, path } => {
                tracing::warn!(
                    request_id = %self.request_id,
                    method = %method,
                    path = %path,
                    "Route not found"
                );
            }
            _ => {
                log_error!("Unhandled error", self.error, request_id = %self.request_id);
            }
        }

        let body = ErrorBody {
            error: self.error.public_message().to_string(),
            request_id: self.request_id.to_string(),
            timestamp: timestamp(),
        };
        (status, Json(body)).into_response()
    }
}

/// Attaches the request id to a handler error.
pub trait ResultExt<T> {
    fn with_request_id(self, request_id: &RequestId) -> Result<T, AppErrorResponse>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn with_request_id(self, request_id: &RequestId) -> Result<T, AppErrorResponse> {
        self.map_err(|e| AppErrorResponse::new(e.into(), request_id.clone()))
    }
}
