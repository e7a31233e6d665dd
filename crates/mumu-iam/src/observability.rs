// Tracing initialization with a configurable and reloadable log level.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Installs the global subscriber at the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    init_tracing_with_level(&config.level);
}

pub fn init_tracing_with_level(level: &str) {
    // RUST_LOG wins over the configured level.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Applies a new logging level at runtime. Returns `false` if tracing was not
/// initialized through this module.
pub fn apply_logging_level(level: &str) -> bool {
    LOG_RELOAD_HANDLE
        .get()
        .is_some_and(|handle| handle.modify(|f| *f = EnvFilter::new(level)).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_after_init() {
        init_tracing_with_level("warn");
        assert!(apply_logging_level("debug"));
        tracing::debug!("level reloaded");
    }
}
