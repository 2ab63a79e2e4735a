//! Structured logging setup shared by `apps/control-plane`'s HTTP server
//! and its background workers, plus the audit-log checksum helper used
//! wherever a mutation needs to write an append-only trail.

use std::panic;

use tracing::{error, info, instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub mod audit;

/// Initializes the global tracing subscriber and a panic hook that routes
/// uncaught panics in any tokio task (not just the one driving `main`)
/// through the same structured sink, so a worker-pool crash is visible in
/// logs instead of silently killing a task.
///
/// Development: compact, colorized, human-readable lines.
/// Production (`debug_assertions` off): flattened JSON events, one per line.
#[instrument(skip_all)]
pub fn init_tracing(service_name: &str) {
    let default_directive = format!(
        "{service_name}={level},tower_http=warn,hyper=warn,libsql=warn",
        level = if cfg!(debug_assertions) { "debug" } else { "info" }
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into());

    if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }

    let service = service_name.to_string();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("panic payload was not a string");

        error!(target: "panic_monitor", service = %service, location = %location, "panic: {message}");
    }));

    info!("tracing initialized for {service_name}");
}
