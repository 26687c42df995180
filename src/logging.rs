// src/logging.rs

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unknown log level: {0}")]
    UnknownLevel(String),
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("logging already initialised: {0}")]
    AlreadyInitialised(String),
}

pub fn parse_level(level: &str) -> Result<Level, LoggingError> {
    level
        .trim()
        .parse::<Level>()
        .map_err(|_| LoggingError::UnknownLevel(level.to_string()))
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("tubetape={level}")))
        .map_err(|e| LoggingError::Filter(e.to_string()))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialised(e.to_string()))
}

/// Test-writer subscriber; safe to call from every test.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tubetape=debug"));
        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
