//! Configuration resolution and constants.
//!
//! Settings come from command-line flags with environment-variable fallbacks
//! (`PORT`, `NODE_ENV`, `LOG_LEVEL`, ...). They are resolved exactly once at
//! startup into an [`AppConfig`], which is handed by value to the logger and
//! the HTTP server. Nothing re-reads the environment after that point.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::logging::UNCAUGHT_TARGET;

// =============================================================================
// HTTP
// =============================================================================

/// Default bind address (all interfaces, as expected inside a container)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Header carrying the correlation id, in both directions
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Liveness probes must never be answered from a cache
pub const CACHE_CONTROL_HEALTH: &str = "no-store";

/// Status recorded for requests the client abandoned before a response
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Body message of the root endpoint
pub const ROOT_MESSAGE: &str = "This is for kubernetes deployment";

// =============================================================================
// Service Identity
// =============================================================================

pub const DEFAULT_SERVICE_NAME: &str = "containership";
pub const DEFAULT_SERVICE_VERSION: &str = "1.0.0";
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// The only environment in which file sinks may be enabled
pub const PRODUCTION_ENVIRONMENT: &str = "production";

/// Reported when HOSTNAME is not set
pub const DEFAULT_HOSTNAME: &str = "unknown";

// =============================================================================
// Logging
// =============================================================================

/// Directory holding the rotating log files
pub const DEFAULT_LOG_DIR: &str = "/var/log/app";

/// Error-only sink file name
pub const ERROR_LOG_FILE: &str = "error.log";

/// All-levels sink file name
pub const COMBINED_LOG_FILE: &str = "combined.log";

/// Size cap of a single log file before it is rotated (100 MiB)
pub const LOG_FILE_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Files retained for the error sink, including the active one
pub const ERROR_LOG_MAX_FILES: usize = 5;

/// Files retained for the combined sink, including the active one
pub const COMBINED_LOG_MAX_FILES: usize = 10;

/// Logged in place of sensitive header values
pub const REDACTED: &str = "[REDACTED]";

/// containership: a minimal HTTP service for container platforms
#[derive(Parser, Debug, Clone)]
#[command(name = "containership", version, about)]
pub struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Deployment environment; "development" selects human-readable logs
    #[arg(short, long, env = "NODE_ENV", default_value = DEFAULT_ENVIRONMENT)]
    pub environment: String,

    /// Service name attached to every log record
    #[arg(long, env = "SERVICE_NAME", default_value = DEFAULT_SERVICE_NAME)]
    pub service_name: String,

    /// Service version attached to every log record
    #[arg(long, env = "SERVICE_VERSION", default_value = DEFAULT_SERVICE_VERSION)]
    pub service_version: String,

    /// Minimum severity emitted
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        value_enum,
        ignore_case = true,
        default_value_t = LogLevel::Info
    )]
    pub log_level: LogLevel,

    /// Full filter directive, overrides --log-level (e.g. "containership=debug,tower_http=info")
    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,

    /// Write rotating log files ("true" to enable; production only)
    #[arg(
        long,
        env = "LOG_TO_FILE",
        default_value = "false",
        action = clap::ArgAction::Set,
        value_parser = parse_enabled
    )]
    pub log_to_file: bool,

    /// Directory for rotating log files
    #[arg(long, env = "LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// Host name reported in log records
    #[arg(long, env = "HOSTNAME", default_value = DEFAULT_HOSTNAME)]
    pub hostname: String,
}

/// Only the literal "true" enables a switch, anything else leaves it off.
fn parse_enabled(value: &str) -> Result<bool, String> {
    Ok(value == "true")
}

/// Minimum severity of emitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colorized, multi-line metadata for humans
    Pretty,
    /// Single-line JSON for log shippers
    Json,
}

impl LogFormat {
    /// "development" gets pretty output, every other environment gets JSON.
    pub fn for_environment(environment: &str) -> Self {
        if environment == DEFAULT_ENVIRONMENT {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP server configuration
    pub http: HttpServerConfig,
    /// Identity merged into every log record
    pub service: ServiceMetadata,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

/// Default metadata attached to every log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMetadata {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub hostname: String,
    pub pid: u32,
}

impl ServiceMetadata {
    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION_ENVIRONMENT
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum severity, used when no filter directive is given
    pub level: LogLevel,
    /// Explicit `EnvFilter` directive taking precedence over `level`
    pub filter: Option<String>,
    /// Console format
    pub format: LogFormat,
    /// Rotating file sinks; only ever set in production
    pub files: Option<FileSinkConfig>,
}

impl LoggingConfig {
    /// Builds the filter: explicit directive first, then the level.
    ///
    /// Uncaught panic records pass at `error` whatever the directive says.
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        let filter = match &self.filter {
            Some(directive) => EnvFilter::try_new(directive).map_err(|e| {
                ConfigError::Validation(format!("invalid log filter '{}': {}", directive, e))
            })?,
            None => EnvFilter::default().add_directive(LevelFilter::from(self.level).into()),
        };

        let uncaught: Directive = format!("{}=error", UNCAUGHT_TARGET)
            .parse()
            .map_err(|e| ConfigError::Validation(format!("invalid uncaught directive: {}", e)))?;
        Ok(filter.add_directive(uncaught))
    }
}

/// Rotating file sink settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSinkConfig {
    pub dir: PathBuf,
    pub max_bytes: u64,
    pub error_max_files: usize,
    pub combined_max_files: usize,
}

impl FileSinkConfig {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            max_bytes: LOG_FILE_MAX_BYTES,
            error_max_files: ERROR_LOG_MAX_FILES,
            combined_max_files: COMBINED_LOG_MAX_FILES,
        }
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.dir.join(ERROR_LOG_FILE)
    }

    pub fn combined_log_path(&self) -> PathBuf {
        self.dir.join(COMBINED_LOG_FILE)
    }
}

impl AppConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.host.trim().is_empty() {
            return Err(ConfigError::Validation("HOST must not be empty".to_string()));
        }
        if args.environment.trim().is_empty() {
            return Err(ConfigError::Validation("NODE_ENV must not be empty".to_string()));
        }
        if args.service_name.trim().is_empty() {
            return Err(ConfigError::Validation("SERVICE_NAME must not be empty".to_string()));
        }

        let service = ServiceMetadata {
            name: args.service_name,
            version: args.service_version,
            environment: args.environment,
            hostname: args.hostname,
            pid: std::process::id(),
        };

        // File sinks only make sense where a log shipper tails them
        let files = (args.log_to_file && service.is_production())
            .then(|| FileSinkConfig::new(args.log_dir));

        let logging = LoggingConfig {
            level: args.log_level,
            filter: args.log_filter.filter(|f| !f.trim().is_empty()),
            format: LogFormat::for_environment(&service.environment),
            files,
        };
        logging.env_filter()?;

        Ok(Self {
            http: HttpServerConfig {
                host: args.host,
                port: args.port,
            },
            service,
            logging,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Validation(String),
}
