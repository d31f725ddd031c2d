//! Tracing/logging initialization for the dbgate binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Default filter covering dbgate's own crates at `level`.
pub fn default_filter(level: &str) -> String {
    format!("dbgate_daemon={level},dbgate_core={level}")
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the level in `log`. With `log.json`
/// set, structured JSON log lines are emitted instead of the
/// human-readable format.
pub fn init_tracing(log: &LogConfig) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(&log.level)),
    );
    if log.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
