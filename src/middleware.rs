//! Request tracing and logging middleware.
//!
//! Layer order, outermost first:
//!
//! 1. [`request_id_layer`] adopts the caller's `x-request-id` or generates a
//!    UUID v4, opens the `request` span that wraps everything below, and
//!    stamps the id on the response.
//! 2. [`request_logging_layer`] logs the arrival of the request and, once the
//!    inner service has produced the response head, its completion. A request
//!    dropped mid-flight is logged as completed with status 499.
//! 3. [`catch_panic_layer`] turns a panicking handler into the 500 envelope,
//!    so even that path reaches the completion log with a real status.
//!
//! The completion hook sits above the router, its fallback and the error
//! boundary, so every response path passes through it exactly once.

use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{REDACTED, REQUEST_ID_HEADER};
use crate::error::{AppError, AppErrorResponse};
use crate::logging::{
    log_aborted_request, log_request, panic_message, take_panic_location, within_request_boundary,
};

/// Correlation id of the current request, available as a request extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// A fresh random id in canonical hyphenated form.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Adopts a non-blank `x-request-id` header, otherwise generates one.
    ///
    /// Values that are not visible ASCII cannot be echoed back as a header
    /// and are replaced.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.trim().is_empty())
            .map(|value| Self(value.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request state of the logging middleware.
///
/// Not `Clone`: [`RequestContext::finish`] consumes it, so a request is
/// recorded as completed at most once.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: Method,
    /// Path and query, as requested
    pub path: String,
    pub client_addr: Option<SocketAddr>,
    pub user_agent: Option<String>,
    started_at: Instant,
}

impl RequestContext {
    pub fn from_request(request: &Request) -> Self {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| RequestId::from_headers(request.headers()));
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());
        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            request_id,
            method: request.method().clone(),
            path,
            client_addr,
            user_agent: header_str(request.headers(), USER_AGENT.as_str()).map(str::to_string),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Emits the completion record.
    pub fn finish(self, status: StatusCode) {
        log_request(&self, status, self.elapsed());
    }

    /// Emits the completion record of a request that never got a response.
    pub fn abort(self) {
        log_aborted_request(&self, self.elapsed());
    }
}

/// The completion record still owed for an in-flight request.
///
/// Hyper drops the response future when the client disconnects. Dropping
/// the guard before [`PendingCompletion::complete`] then records the request
/// as aborted, so every request still gets exactly one completion record.
pub struct PendingCompletion(Option<RequestContext>);

impl PendingCompletion {
    pub fn new(context: RequestContext) -> Self {
        Self(Some(context))
    }

    pub fn complete(mut self, status: StatusCode) {
        if let Some(context) = self.0.take() {
            context.finish(status);
        }
    }
}

impl Drop for PendingCompletion {
    fn drop(&mut self) {
        if let Some(context) = self.0.take() {
            context.abort();
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Middleware that resolves the request ID and creates the request span.
///
/// This must be the outermost layer so the span covers logging, the error
/// boundary and the handler.
pub async fn request_id_layer(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::from_headers(request.headers());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).instrument(span).await;

    // Ids are adopted only from valid header values or generated, so this
    // conversion cannot fail in practice
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Middleware that logs request arrival and completion.
pub async fn request_logging_layer(request: Request, next: Next) -> Response {
    let context = RequestContext::from_request(&request);
    let headers = request.headers();

    tracing::info!(
        request_id = %context.request_id,
        method = %context.method,
        path = %context.path,
        client_addr = context.client_addr.as_ref().map(tracing::field::display),
        user_agent = context.user_agent.as_deref(),
        content_type = header_str(headers, CONTENT_TYPE.as_str()),
        authorization = headers.contains_key(AUTHORIZATION).then_some(REDACTED),
        "Incoming request"
    );

    let pending = PendingCompletion::new(context);
    let response = next.run(request).await;
    pending.complete(response.status());
    response
}

/// Middleware that converts a panicking handler into a 500 response.
pub async fn catch_panic_layer(request: Request, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_else(|| RequestId::from_headers(request.headers()));

    let outcome = within_request_boundary(AssertUnwindSafe(next.run(request)).catch_unwind()).await;

    match outcome {
        Ok(response) => response,
        Err(payload) => {
            let error = AppError::Panic {
                message: panic_message(payload.as_ref()),
                location: take_panic_location().unwrap_or_else(|| "unknown".to_string()),
            };
            AppErrorResponse::new(error, request_id).into_response()
        }
    }
}
