//! Root endpoint.

use axum::{response::Json, Extension};
use serde::{Deserialize, Serialize};

use super::timestamp;
use crate::config::ROOT_MESSAGE;
use crate::middleware::RequestId;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootResponse {
    pub message: String,
    pub request_id: String,
    pub timestamp: String,
}

pub async fn index(Extension(request_id): Extension<RequestId>) -> Json<RootResponse> {
    tracing::info!(request_id = %request_id, "Root endpoint accessed");

    Json(RootResponse {
        message: ROOT_MESSAGE.to_string(),
        request_id: request_id.0,
        timestamp: timestamp(),
    })
}
