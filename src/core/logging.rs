//! Logging setup
//!
//! The bridge logs through `tracing`. Hosts that do not install their own
//! subscriber can call [`init_logging`] once at startup; `RUST_LOG` overrides
//! the configured level.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs a fmt subscriber. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .try_init();
    tracing::debug!(target: "bridge", level = config.level.as_filter(), "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
