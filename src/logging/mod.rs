//! Structured logging for the whole process.
//!
//! [`init_logging`] installs one global `tracing` subscriber built from the
//! resolved [`LoggingConfig`]:
//!
//! - **Console**: [`LogShipperFormat`] (single-line JSON) everywhere except
//!   `development`, which gets [`DevelopmentFormat`]. In development a second,
//!   JSON console layer carries only uncaught panics so they stay
//!   machine-readable.
//! - **Files** (production with `LOG_TO_FILE=true`): `error.log` with error
//!   records only and `combined.log` with everything, each a [`RotatingFile`]
//!   behind a `tracing-appender` non-blocking writer so the request path never
//!   waits on disk.
//!
//! Every record is formatted into one buffer and handed to its writer in a
//! single write, so records from concurrent requests never interleave.

mod format;
mod panic;
mod rotation;
#[cfg(test)]
mod testing;

use std::fmt;
use std::io;
use std::time::Duration;

use axum::http::StatusCode;
use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::format::JsonFields;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

use crate::config::{
    ConfigError, FileSinkConfig, LogFormat, LoggingConfig, ServiceMetadata, CLIENT_CLOSED_REQUEST,
};
use crate::middleware::RequestContext;

pub use format::{DevelopmentFormat, LogShipperFormat};
pub use panic::{
    install_panic_hook, panic_message, take_panic_location, within_request_boundary,
    UNCAUGHT_TARGET,
};
pub use rotation::RotatingFile;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open log file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to install global subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the file writers alive; dropping it flushes buffered records.
///
/// Hold it in `main` until shutdown.
#[must_use = "dropping the guard stops the file writers"]
pub struct LogGuard {
    _workers: Vec<WorkerGuard>,
}

/// JSON console/file layer.
pub fn log_shipper_layer<S, W>(
    service: &ServiceMetadata,
    writer: W,
) -> tracing_subscriber::fmt::Layer<S, JsonFields, LogShipperFormat, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .fmt_fields(JsonFields::new())
        .event_format(LogShipperFormat::new(service.clone()))
        .with_writer(writer)
        .with_ansi(false)
}

/// Colorized console layer for local development.
pub fn development_layer<S, W>(
    service: &ServiceMetadata,
    writer: W,
) -> tracing_subscriber::fmt::Layer<S, JsonFields, DevelopmentFormat, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .fmt_fields(JsonFields::new())
        .event_format(DevelopmentFormat::new(service.clone()))
        .with_writer(writer)
        .with_ansi(true)
}

fn console_layers<W>(format: LogFormat, service: &ServiceMetadata, writer: W) -> Vec<BoxedLayer>
where
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => vec![log_shipper_layer(service, writer).boxed()],
        LogFormat::Pretty => vec![
            development_layer(service, writer.clone())
                .with_filter(filter_fn(|meta| meta.target() != UNCAUGHT_TARGET))
                .boxed(),
            log_shipper_layer(service, writer)
                .with_filter(filter_fn(|meta| meta.target() == UNCAUGHT_TARGET))
                .boxed(),
        ],
    }
}

fn file_layers(
    files: &FileSinkConfig,
    service: &ServiceMetadata,
) -> Result<(Vec<BoxedLayer>, Vec<WorkerGuard>), io::Error> {
    let error_file =
        RotatingFile::open(files.error_log_path(), files.max_bytes, files.error_max_files)?;
    let combined_file =
        RotatingFile::open(files.combined_log_path(), files.max_bytes, files.combined_max_files)?;

    let (error_writer, error_guard) = tracing_appender::non_blocking(error_file);
    let (combined_writer, combined_guard) = tracing_appender::non_blocking(combined_file);

    let layers = vec![
        log_shipper_layer(service, error_writer)
            .with_filter(LevelFilter::ERROR)
            .boxed(),
        log_shipper_layer(service, combined_writer).boxed(),
    ];
    Ok((layers, vec![error_guard, combined_guard]))
}

/// Installs the global subscriber and the panic hook. Call once, at startup.
pub fn init_logging(
    config: &LoggingConfig,
    service: &ServiceMetadata,
) -> Result<LogGuard, LoggingError> {
    let filter = config.env_filter()?;

    let mut layers = console_layers(config.format, service, io::stdout);
    let mut workers = Vec::new();
    if let Some(files) = &config.files {
        let (file_layers, guards) = file_layers(files, service)?;
        layers.extend(file_layers);
        workers.extend(guards);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    install_panic_hook();

    tracing::debug!(
        level = config.level.as_str(),
        filter = config.filter.as_deref(),
        format = ?config.format,
        "Logging initialized"
    );
    if let Some(files) = &config.files {
        tracing::info!(
            error_log = %files.error_log_path().display(),
            combined_log = %files.combined_log_path().display(),
            max_bytes = files.max_bytes,
            "Writing rotating log files"
        );
    }

    Ok(LogGuard { _workers: workers })
}

/// An error with its chain of sources, one cause per line.
pub struct ErrorChain<'a>(pub &'a (dyn std::error::Error + 'a));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, "\n  caused by: {}", cause)?;
            source = cause.source();
        }
        Ok(())
    }
}

/// Emits an `error` record carrying the error (`error`), its source chain
/// (`stack`) and any extra fields.
///
/// ```ignore
/// log_error!("Unhandled error", err, request_id = %request_id);
/// ```
#[macro_export]
macro_rules! log_error {
    ($message:expr, $error:expr) => {{
        let error: &dyn ::std::error::Error = &$error;
        ::tracing::error!(
            error = %error,
            stack = %$crate::logging::ErrorChain(error),
            "{}",
            $message
        )
    }};
    ($message:expr, $error:expr, $($field:tt)+) => {{
        let error: &dyn ::std::error::Error = &$error;
        ::tracing::error!(
            $($field)+,
            error = %error,
            stack = %$crate::logging::ErrorChain(error),
            "{}",
            $message
        )
    }};
}

/// Emits the "Request completed" record for a finished request.
pub fn log_request(context: &RequestContext, status: StatusCode, duration: Duration) {
    tracing::info!(
        request_id = %context.request_id,
        method = %context.method,
        path = %context.path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        user_agent = context.user_agent.as_deref(),
        client_addr = context.client_addr.as_ref().map(tracing::field::display),
        "Request completed"
    );
}

/// Emits the "Request completed" record for a request dropped before a
/// response was produced, usually because the client disconnected.
pub fn log_aborted_request(context: &RequestContext, duration: Duration) {
    tracing::info!(
        request_id = %context.request_id,
        method = %context.method,
        path = %context.path,
        status = CLIENT_CLOSED_REQUEST,
        aborted = true,
        duration_ms = duration.as_millis() as u64,
        user_agent = context.user_agent.as_deref(),
        client_addr = context.client_addr.as_ref().map(tracing::field::display),
        "Request completed"
    );
}
