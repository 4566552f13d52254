//! Event formatters for the console and file sinks.
//!
//! Both formatters flatten a record into one JSON map: fields of the enclosing
//! spans first (outermost to innermost), then the event's own fields. Span
//! fields are read back from the `FormattedFields<JsonFields>` extension that
//! the fmt layer stores, so layers using these formatters must be configured
//! with `fmt_fields(JsonFields::new())`.

use std::fmt;

use chrono::Local;
use owo_colors::OwoColorize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

use crate::config::ServiceMetadata;

/// `@timestamp` layout expected by the log shipper
const SHIPPER_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Short clock for terminal output
const DEVELOPMENT_TIMESTAMP_FORMAT: &str = "%H:%M:%S";

const MESSAGE_FIELD: &str = "message";
const REQUEST_ID_FIELD: &str = "request_id";

/// Characters of the correlation id shown in development output
const SHORT_REQUEST_ID_LEN: usize = 8;

/// Lowercase level name as it appears in records.
pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

/// Collects event fields into a JSON map, keeping native number and bool types.
#[derive(Default)]
struct FieldCollector {
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{:?}", value)));
    }
}

/// A flattened event: its message plus span and event fields.
struct Record {
    message: String,
    fields: Map<String, Value>,
}

fn collect_record<S, N>(ctx: &FmtContext<'_, S, N>, event: &Event<'_>) -> Record
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let mut fields = Map::new();

    if let Some(scope) = ctx.event_scope() {
        for span in scope.from_root() {
            let extensions = span.extensions();
            let Some(formatted) = extensions.get::<FormattedFields<N>>() else {
                continue;
            };
            // Spans without recorded fields store an empty string
            if let Ok(Value::Object(span_fields)) = serde_json::from_str(&formatted.fields) {
                fields.extend(span_fields);
            }
        }
    }

    let mut collector = FieldCollector::default();
    event.record(&mut collector);
    let message = match collector.fields.remove(MESSAGE_FIELD) {
        Some(Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    fields.extend(collector.fields);

    Record { message, fields }
}

fn default_fields(service: &ServiceMetadata) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("service".to_string(), Value::from(service.name.as_str()));
    fields.insert("version".to_string(), Value::from(service.version.as_str()));
    fields.insert("environment".to_string(), Value::from(service.environment.as_str()));
    fields.insert("hostname".to_string(), Value::from(service.hostname.as_str()));
    fields.insert("pid".to_string(), Value::from(service.pid));
    fields
}

/// Single-line JSON for log shippers.
///
/// Field order is fixed: `@timestamp`, `level`, `message`, `service`,
/// `version`, `environment`, then `hostname`, `pid` and the record's own
/// fields. A record field sharing a name with a default overwrites the value
/// in place.
#[derive(Debug, Clone)]
pub struct LogShipperFormat {
    service: ServiceMetadata,
}

impl LogShipperFormat {
    pub fn new(service: ServiceMetadata) -> Self {
        Self { service }
    }

    fn render(&self, timestamp: String, level: &Level, record: Record) -> Value {
        let mut line = Map::new();
        line.insert("@timestamp".to_string(), Value::from(timestamp));
        line.insert("level".to_string(), Value::from(level_name(level)));
        line.insert(MESSAGE_FIELD.to_string(), Value::from(record.message));
        line.extend(default_fields(&self.service));
        line.extend(record.fields);
        Value::Object(line)
    }
}

impl<S, N> FormatEvent<S, N> for LogShipperFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let record = collect_record(ctx, event);
        let timestamp = Local::now().format(SHIPPER_TIMESTAMP_FORMAT).to_string();
        let line = self.render(timestamp, event.metadata().level(), record);
        writeln!(writer, "{}", line)
    }
}

/// Human-readable output for local development.
///
/// `HH:MM:SS level [reqid8] message {metadata}`, with the metadata
/// pretty-printed and the level colorized when the writer supports ANSI.
#[derive(Debug, Clone)]
pub struct DevelopmentFormat {
    service: ServiceMetadata,
}

impl DevelopmentFormat {
    pub fn new(service: ServiceMetadata) -> Self {
        Self { service }
    }

    fn render(&self, timestamp: String, level: &Level, mut record: Record, ansi: bool) -> String {
        let mut parts = vec![timestamp, paint_level(level, ansi)];

        if let Some(Value::String(request_id)) = record.fields.remove(REQUEST_ID_FIELD) {
            let short: String = request_id.chars().take(SHORT_REQUEST_ID_LEN).collect();
            parts.push(format!("[{}]", short));
        }

        parts.push(record.message);

        let mut meta = default_fields(&self.service);
        meta.extend(record.fields);
        if let Ok(pretty) = serde_json::to_string_pretty(&Value::Object(meta)) {
            parts.push(pretty);
        }

        parts.join(" ")
    }
}

fn paint_level(level: &Level, ansi: bool) -> String {
    let name = level_name(level);
    if !ansi {
        return name.to_string();
    }
    match *level {
        Level::ERROR => name.red().to_string(),
        Level::WARN => name.yellow().to_string(),
        Level::INFO => name.green().to_string(),
        Level::DEBUG => name.blue().to_string(),
        Level::TRACE => name.magenta().to_string(),
    }
}

impl<S, N> FormatEvent<S, N> for DevelopmentFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let record = collect_record(ctx, event);
        let timestamp = Local::now().format(DEVELOPMENT_TIMESTAMP_FORMAT).to_string();
        let ansi = writer.has_ansi_escapes();
        let line = self.render(timestamp, event.metadata().level(), record, ansi);
        writeln!(writer, "{}", line)
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::fmt::format::JsonFields;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::logging::testing::{service, Buffer};

    fn capture_json(f: impl FnOnce()) -> Vec<Map<String, Value>> {
        let buffer = Buffer::default();
        let layer = tracing_subscriber::fmt::layer()
            .fmt_fields(JsonFields::new())
            .event_format(LogShipperFormat::new(service()))
            .with_writer(buffer.clone())
            .with_ansi(false);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);

        buffer
            .contents()
            .lines()
            .map(|line| match serde_json::from_str(line) {
                Ok(Value::Object(map)) => map,
                other => panic!("not a JSON object: {:?}", other),
            })
            .collect()
    }

    fn capture_development(f: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let layer = tracing_subscriber::fmt::layer()
            .fmt_fields(JsonFields::new())
            .event_format(DevelopmentFormat::new(service()))
            .with_writer(buffer.clone())
            .with_ansi(false);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        buffer.contents()
    }

    #[test]
    fn test_shipper_leading_field_order() {
        let lines = capture_json(|| tracing::info!(port = 3000, "Server started"));
        assert_eq!(lines.len(), 1);
        let keys: Vec<&str> = lines[0].keys().map(String::as_str).collect();
        assert_eq!(
            &keys[..8],
            &["@timestamp", "level", "message", "service", "version", "environment", "hostname", "pid"]
        );
        assert_eq!(lines[0]["level"], "info");
        assert_eq!(lines[0]["message"], "Server started");
        assert_eq!(lines[0]["service"], "svc");
        assert_eq!(lines[0]["version"], "1.2.3");
        assert_eq!(lines[0]["environment"], "production");
        assert_eq!(lines[0]["pid"], 42);
        assert_eq!(lines[0]["port"], 3000);
    }

    #[test]
    fn test_shipper_timestamp_layout() {
        let lines = capture_json(|| tracing::warn!("tick"));
        let timestamp = lines[0]["@timestamp"].as_str().unwrap();
        assert!(
            chrono::NaiveDateTime::parse_from_str(timestamp, SHIPPER_TIMESTAMP_FORMAT).is_ok(),
            "unexpected timestamp {}",
            timestamp
        );
        assert_eq!(lines[0]["level"], "warn");
    }

    #[test]
    fn test_shipper_output_is_single_line() {
        let buffer = Buffer::default();
        let layer = tracing_subscriber::fmt::layer()
            .fmt_fields(JsonFields::new())
            .event_format(LogShipperFormat::new(service()))
            .with_writer(buffer.clone());
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(stack = "first\nsecond", "multi\nline message");
        });

        let contents = buffer.contents();
        assert_eq!(contents.lines().count(), 1);
        let line: Value = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(line["message"], "multi\nline message");
        assert_eq!(line["stack"], "first\nsecond");
    }

    #[test]
    fn test_shipper_merges_span_fields() {
        let lines = capture_json(|| {
            let span = tracing::info_span!("request", request_id = "abc-123", method = "GET");
            let _entered = span.enter();
            tracing::info!(status = 200u16, "Request completed");
        });
        assert_eq!(lines[0]["request_id"], "abc-123");
        assert_eq!(lines[0]["method"], "GET");
        assert_eq!(lines[0]["status"], 200);
    }

    #[test]
    fn test_event_field_overrides_default_in_place() {
        let lines = capture_json(|| tracing::info!(service = "other", "Server started"));
        let keys: Vec<&str> = lines[0].keys().map(String::as_str).collect();
        assert_eq!(keys[3], "service");
        assert_eq!(lines[0]["service"], "other");
    }

    #[test]
    fn test_development_shows_short_request_id() {
        let output = capture_development(|| {
            tracing::info!(request_id = "0123456789abcdef", path = "/health", "Health check accessed");
        });
        assert!(output.contains(" info [01234567] Health check accessed "), "{}", output);
        assert!(output.contains("\"path\": \"/health\""), "{}", output);
        assert!(output.contains("\"service\": \"svc\""), "{}", output);
        assert!(!output.contains("0123456789abcdef"), "{}", output);
    }

    #[test]
    fn test_development_without_request_id() {
        let output = capture_development(|| tracing::debug!("Server started"));
        assert!(output.contains(" debug Server started "), "{}", output);
        assert!(!output.contains('['), "{}", output);
    }

    #[test]
    fn test_paint_level_plain_and_colored() {
        assert_eq!(paint_level(&Level::WARN, false), "warn");
        let colored = paint_level(&Level::ERROR, true);
        assert!(colored.contains("error"));
        assert!(colored.starts_with('\u{1b}'));
    }
}
