//! containership: a minimal HTTP service for container platforms.
//!
//! Serves `GET /` and `GET /health` behind a middleware stack that assigns or
//! propagates a correlation id per request and writes structured logs for
//! request arrival and completion.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::AppConfig;
pub use error::{AppError, AppErrorResponse};
pub use routes::create_router;
pub use state::AppState;
