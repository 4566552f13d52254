//! Shared utilities for integration tests.

use std::io;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use serde_json::Value;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

use containership::config::ServiceMetadata;
use containership::logging::log_shipper_layer;

/// In-memory log sink.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Routes this thread's records into the capture as production JSON.
    ///
    /// Tests must run on a current-thread runtime (the `#[tokio::test]`
    /// default) so every record is emitted on the test thread.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber =
            tracing_subscriber::registry().with(log_shipper_layer(&service(), capture.clone()));
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Every captured line, parsed; panics on a line that is not JSON.
    pub fn records(&self) -> Vec<Value> {
        self.text()
            .lines()
            .map(|line| serde_json::from_str(line).expect("log line is valid JSON"))
            .collect()
    }

    pub fn with_message(&self, message: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|record| record["message"] == message)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub fn service() -> ServiceMetadata {
    ServiceMetadata {
        name: "containership".to_string(),
        version: "1.0.0".to_string(),
        environment: "production".to_string(),
        hostname: "test-host".to_string(),
        pid: std::process::id(),
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn request_id_header(response: &Response<Body>) -> String {
    response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header")
        .to_str()
        .unwrap()
        .to_string()
}
