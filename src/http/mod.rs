//! HTTP server startup and signal handling.
//!
//! The server runs until SIGTERM or SIGINT arrives. It then logs the signal
//! and returns at once; in-flight requests are not drained.

mod server;
mod shutdown;

pub use server::{start_server, ServerError};
pub use shutdown::ShutdownSignal;
