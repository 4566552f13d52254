//! Shared application state for request handlers.

use std::time::{Duration, Instant};

/// Shared application state, cheap to clone into every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    started_at: Instant,
}

impl AppState {
    /// Creates the state; uptime is measured from this call.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
