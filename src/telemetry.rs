//! Logging initialization.
//!
//! Structured logs go through `tracing`. The default filter comes from the
//! facilitator config's `log.level`; `RUST_LOG` overrides it when set.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Installs the global `tracing` subscriber. Call once at startup, before
/// any spans are created.
pub fn init(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
