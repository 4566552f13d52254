//! HTTP server startup logic.

use std::future::IntoFuture;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::AppConfig;

use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Serve `app` until a termination signal arrives.
///
/// Returns as soon as the signal is logged. Connections still open at that
/// point are dropped with the runtime.
pub async fn start_server(app: Router, config: &AppConfig) -> Result<(), ServerError> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind((config.http.host.as_str(), config.http.port))
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        address = %local_addr,
        port = config.http.port,
        environment = %config.service.environment,
        service = %config.service.name,
        version = %config.service.version,
        build = env!("CARGO_PKG_VERSION"),
        "Server started"
    );

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .into_future();

    tokio::select! {
        result = server => {
            result?;
            tracing::warn!("Server stopped without a signal");
            Ok(())
        }
        signal = shutdown::wait_for_signal() => {
            let signal = signal.map_err(ServerError::Signal)?;
            tracing::info!(
                signal = signal.name(),
                "{} received, shutting down",
                signal.name()
            );
            Ok(())
        }
    }
}
