//! Capture of panics that escape request handling.
//!
//! Panics raised inside a request boundary are left to the request error
//! middleware, which answers with a 500 and logs them with request context.
//! Everything else (startup code, spawned tasks, the logger's own callers)
//! is reported here as an `error` record on the [`UNCAUGHT_TARGET`] target,
//! tagged `exception = true`.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;

/// Target of records emitted for uncaught panics
pub const UNCAUGHT_TARGET: &str = "uncaught";

tokio::task_local! {
    static REQUEST_BOUNDARY: ();
}

thread_local! {
    static LAST_PANIC_LOCATION: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Runs `future` with panics attributed to the current request.
pub async fn within_request_boundary<F: Future>(future: F) -> F::Output {
    REQUEST_BOUNDARY.scope((), future).await
}

fn inside_request_boundary() -> bool {
    REQUEST_BOUNDARY.try_with(|_| ()).is_ok()
}

/// Location of the last panic caught inside a request boundary on this thread.
pub fn take_panic_location() -> Option<String> {
    LAST_PANIC_LOCATION.with(|cell| cell.borrow_mut().take())
}

/// Text of a panic payload; `panic!` produces either `&str` or `String`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Replaces the default panic hook (which writes unstructured text to stderr).
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(|location| location.to_string());

        if inside_request_boundary() {
            LAST_PANIC_LOCATION.with(|cell| *cell.borrow_mut() = location);
            return;
        }

        let message = panic_message(info.payload());
        let stack = Backtrace::capture();
        let thread = std::thread::current();
        tracing::error!(
            target: UNCAUGHT_TARGET,
            exception = true,
            error = %message,
            location = location.as_deref(),
            thread = thread.name(),
            stack = %stack,
            "Uncaught panic"
        );
    }));
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::filter_fn;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Layer;

    use super::*;
    use crate::logging::log_shipper_layer;
    use crate::logging::testing::{service, Buffer};

    /// Serializes tests that swap the process-wide panic hook.
    static HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn explode() {
        panic!("worker exploded")
    }

    #[test]
    fn test_hook_reports_panic_outside_request() {
        let buffer = Buffer::default();
        let writer = buffer.clone();

        let _lock = HOOK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let previous = std::panic::take_hook();
        install_panic_hook();
        let outcome = std::thread::Builder::new()
            .name("background-worker".to_string())
            .spawn(move || {
                let layer = log_shipper_layer(&service(), writer)
                    .with_filter(filter_fn(|meta| meta.target() == UNCAUGHT_TARGET));
                let subscriber = tracing_subscriber::registry().with(layer);
                tracing::subscriber::with_default(subscriber, explode);
            })
            .unwrap()
            .join();
        std::panic::set_hook(previous);

        assert!(outcome.is_err());
        let records = buffer.json_lines();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "error");
        assert_eq!(records[0]["message"], "Uncaught panic");
        assert_eq!(records[0]["exception"], true);
        assert_eq!(records[0]["error"], "worker exploded");
        assert_eq!(records[0]["thread"], "background-worker");
        assert!(records[0]["location"].as_str().unwrap().contains("panic.rs"));
    }

    #[test]
    fn test_hook_defers_panic_inside_request_boundary() {
        let buffer = Buffer::default();
        let layer = log_shipper_layer(&service(), buffer.clone());
        let _default = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

        let _lock = HOOK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let previous = std::panic::take_hook();
        install_panic_hook();
        let outcome = futures::executor::block_on(within_request_boundary(async {
            std::panic::catch_unwind(explode)
        }));
        std::panic::set_hook(previous);

        assert!(outcome.is_err());
        assert!(buffer.contents().is_empty());
        assert!(take_panic_location().unwrap().contains("panic.rs"));
    }

    #[test]
    fn test_panic_message_from_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("formatted 42"));
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_request_boundary_is_scoped() {
        assert!(!inside_request_boundary());
        let inside = within_request_boundary(async { inside_request_boundary() }).await;
        assert!(inside);
        assert!(!inside_request_boundary());
    }

    #[test]
    fn test_take_panic_location_clears() {
        LAST_PANIC_LOCATION.with(|cell| *cell.borrow_mut() = Some("src/main.rs:1:1".to_string()));
        assert_eq!(take_panic_location().as_deref(), Some("src/main.rs:1:1"));
        assert_eq!(take_panic_location(), None);
    }
}
