//! containership entry point.
//!
//! Resolves configuration from flags and environment, installs the logger,
//! builds the router and serves until SIGTERM/SIGINT.

use clap::Parser;

use containership::config::Args;
use containership::http::start_server;
use containership::logging::init_logging;
use containership::{create_router, log_error, AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments (each falls back to its environment variable)
    let config = AppConfig::from_args(Args::parse())?;

    // Flushes the file sinks when dropped at the end of main
    let _log_guard = init_logging(&config.logging, &config.service)?;

    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        environment = %config.service.environment,
        hostname = %config.service.hostname,
        "Loaded configuration"
    );

    let app = create_router(AppState::new());

    if let Err(e) = start_server(app, &config).await {
        log_error!("Server failed", e);
        return Err(e.into());
    }

    Ok(())
}
