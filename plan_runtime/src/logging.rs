//! Tracing subscriber setup.
//!
//! Logs go to stderr so that reports printed on stdout stay machine-readable.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::io;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
///
/// # Returns
///
/// * `Ok(true)` - the subscriber was installed
/// * `Ok(false)` - a global subscriber already existed and was kept
///
/// # Errors
///
/// Returns an error if the level or format is unknown
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let default_level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let installed = match config.format.as_str() {
        "json" => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init().is_ok()
        }
        "pretty" => {
            let layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stderr)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init().is_ok()
        }
        other => anyhow::bail!("Invalid log format: {other}"),
    };

    if installed {
        tracing::debug!(level = %config.level, format = %config.format, "logger initialized");
    }
    Ok(installed)
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}
