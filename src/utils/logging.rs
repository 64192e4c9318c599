//! Structured logging setup for programs embedding the engine.
//!
//! The library only emits `tracing` events. Whoever owns the process decides
//! whether to install a subscriber; [`init`] is a convenience for that.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Builds the filter: `RUST_LOG` wins, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()))
}

/// Installs a global fmt subscriber according to `config`.
///
/// # Errors
/// Returns `ProtocolError::ConfigError` if a global subscriber is already set
pub fn init(config: &LoggingConfig) -> Result<()> {
    let builder = fmt()
        .with_env_filter(env_filter(config))
        .with_target(config.with_target);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))
}
