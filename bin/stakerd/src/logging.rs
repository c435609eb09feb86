//! Logging initialization for the daemon binaries.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Configuration for the logger.
#[derive(Debug, Clone)]
pub(crate) struct LoggerConfig {
    /// Identifies the service in log lines.
    whoami: String,
}

impl LoggerConfig {
    /// Creates a new instance with the given whoami string.
    pub(crate) const fn new(whoami: String) -> Self {
        Self { whoami }
    }
}

/// Initializes the logging subsystem: stdout with a compact format, filtered
/// through `RUST_LOG`.
pub(crate) fn init(config: LoggerConfig) {
    let filter = tracing_subscriber::EnvFilter::from_default_env();

    let log_file = std::env::var("LOG_FILE").is_ok_and(|v| v == "1");
    let log_line_num = std::env::var("LOG_LINE_NUM").is_ok_and(|v| v == "1");

    let stdout_sub = tracing_subscriber::fmt::layer()
        .compact()
        .event_format(
            tracing_subscriber::fmt::format()
                .with_file(log_file)
                .with_line_number(log_line_num),
        )
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout_sub).init();

    info!(whoami = %config.whoami, "logging started");
}
