//! HTTP route handlers and router assembly.
//!
//! Every route returns JSON and carries the correlation id in its body. The
//! middleware stack is applied with `Router::layer`, so it also wraps the
//! fallback: unmatched paths and methods are traced and logged like any
//! other request.

pub mod fallback;
pub mod health;
pub mod home;

use axum::http::header::{HeaderValue, CACHE_CONTROL};
use axum::{middleware, routing::get, Router};
use chrono::{SecondsFormat, Utc};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::CACHE_CONTROL_HEALTH;
use crate::middleware::{catch_panic_layer, request_id_layer, request_logging_layer};
use crate::state::AppState;

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Application routes without middleware or state.
pub fn routes() -> Router<AppState> {
    let home_routes = Router::new().route("/", get(home::index));

    // Health check - no caching, always fresh for liveness probes
    let health_routes = Router::new().route("/health", get(health::health)).layer(
        SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_HEALTH),
        ),
    );

    Router::new()
        .merge(home_routes)
        .merge(health_routes)
        .fallback(fallback::not_found)
        .method_not_allowed_fallback(fallback::not_found)
}

/// Attaches state and the tracing/logging middleware stack.
pub fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .with_state(state)
        // Error boundary - innermost, so panics still reach the completion log
        .layer(middleware::from_fn(catch_panic_layer))
        // Entry and completion records
        .layer(middleware::from_fn(request_logging_layer))
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    with_middleware(routes(), state)
}
