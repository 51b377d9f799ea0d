//! # Structured Logging Module
//!
//! Environment-aware console logging on top of `tracing`. Logs go to stdout,
//! optionally as JSON lines for container log collectors.
//!
//! The log level comes from `LOG_LEVEL`, then `RUST_LOG`, then an
//! environment default (`debug` everywhere except `production`). Setting
//! `LOG_FORMAT=json` switches the console layer to JSON output.
//!
//! The broker client's own logger severity is a separate knob, read once into
//! [`ConnectorContext`](crate::context::ConnectorContext).

use std::io::IsTerminal;
use std::sync::OnceLock;

use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// Safe to call repeatedly and safe when the host already installed a global
/// subscriber; in that case the existing subscriber is kept.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = wants_json_output();
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout()) && !json;

        let console_layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                json,
                "Structured logging initialized"
            );
        }

        install_trace_propagator();
    });
}

/// W3C trace context for the text-map carried in message properties
pub fn install_trace_propagator() {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
}

fn get_environment() -> String {
    std::env::var("CONNECTOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }

    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn wants_json_output() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
