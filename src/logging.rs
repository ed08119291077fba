//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and, optionally,
//! to JSON log files for following requests as they hop between cluster nodes.

use std::fs;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment).to_string());
        let pid = process::id();

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        let file_layer = if config.json && fs::create_dir_all(&config.directory).is_ok() {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            let file_name = format!("{environment}.{pid}.{timestamp}.log");
            let appender = tracing_appender::rolling::never(&config.directory, file_name);
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            // The writer must outlive every span; keep its guard for the process lifetime
            std::mem::forget(worker_guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level)),
            )
        } else {
            None
        };

        // A global subscriber may already be installed by the host process
        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            json = config.json,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("DAPI_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for a routed request
pub fn log_request_operation(
    operation: &str,
    function: &str,
    request_type: &str,
    node: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        function = %function,
        request_type = %request_type,
        node = node,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "DAPI_REQUEST"
    );
}

/// Log structured data for a cross-node queue item
pub fn log_queue_operation(
    queue: &str,
    origin: &str,
    request_id: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        queue = %queue,
        origin = %origin,
        request_id = %request_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "DAPI_QUEUE"
    );
}
