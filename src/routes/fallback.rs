//! Catch-all for unmatched routes and methods.

use axum::{
    http::{Method, Uri},
    Extension,
};

use crate::error::{AppError, AppErrorResponse};
use crate::middleware::RequestId;

/// Answers 404 with the JSON error envelope; logged at `warn`.
pub async fn not_found(
    Extension(request_id): Extension<RequestId>,
    method: Method,
    uri: Uri,
) -> AppErrorResponse {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    AppErrorResponse::new(AppError::RouteNotFound { method, path }, request_id)
}
