//! Health check endpoint for container orchestration.
//!
//! A liveness probe: answers 200 with `status: "UP"` whenever the process can
//! serve HTTP, plus uptime and memory figures for dashboards.

use axum::{extract::State, response::Json, Extension};
use serde::{Deserialize, Serialize};

use super::timestamp;
use crate::middleware::RequestId;
use crate::state::AppState;

/// Process status file on Linux; absent elsewhere
const PROC_STATUS_PATH: &str = "/proc/self/status";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    /// Seconds since the service started
    pub uptime: f64,
    pub memory: MemoryUsage,
    pub request_id: String,
}

/// Process memory in bytes, `None` where the platform does not report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Resident set size
    pub rss: Option<u64>,
    /// Virtual memory size
    #[serde(rename = "virtual")]
    pub virtual_size: Option<u64>,
}

impl MemoryUsage {
    pub fn current() -> Self {
        std::fs::read_to_string(PROC_STATUS_PATH)
            .map(|status| Self::from_proc_status(&status))
            .unwrap_or_default()
    }

    /// Reads `VmRSS` and `VmSize` (reported in kB) from `/proc/<pid>/status`.
    fn from_proc_status(status: &str) -> Self {
        let mut usage = Self::default();
        for line in status.lines() {
            if let Some(value) = line.strip_prefix("VmRSS:") {
                usage.rss = parse_kb(value);
            } else if let Some(value) = line.strip_prefix("VmSize:") {
                usage.virtual_size = parse_kb(value);
            }
        }
        usage
    }
}

fn parse_kb(value: &str) -> Option<u64> {
    let kb: u64 = value.trim().trim_end_matches("kB").trim().parse().ok()?;
    Some(kb * 1024)
}

/// Health check handler.
pub async fn health(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Json<HealthResponse> {
    let uptime = state.uptime().as_secs_f64();
    let memory = MemoryUsage::current();

    tracing::info!(
        request_id = %request_id,
        uptime,
        memory_rss = memory.rss,
        "Health check accessed"
    );

    Json(HealthResponse {
        status: "UP".to_string(),
        timestamp: timestamp(),
        uptime,
        memory,
        request_id: request_id.0,
    })
}
