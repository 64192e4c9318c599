//! # Configuration Management
//!
//! Centralized configuration for NXCP sessions.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` or strings via `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! Durations are written as integer milliseconds.
//!
//! ```rust
//! use nxcp::config::NxcpConfig;
//! use std::time::Duration;
//!
//! let config = NxcpConfig::from_toml(
//!     r#"
//!     [session]
//!     server_address = "10.0.0.5:4701"
//!     command_timeout = 5000
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.session.command_timeout, Duration::from_secs(5));
//! assert!(config.validate().is_empty());
//! ```

use crate::core::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::codes::{cmd, DEFAULT_PORT};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Whether to compress large outgoing bodies by default
pub const ENABLE_COMPRESSION: bool = false;

/// Whether to request encryption by default
pub const ENABLE_ENCRYPTION: bool = false;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NxcpConfig {
    /// Session behaviour
    #[serde(default)]
    pub session: SessionConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NxcpConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `NXCP_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `NXCP_*` environment variables on top of the current values.
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("NXCP_SERVER_ADDRESS") {
            self.session.server_address = addr;
        }

        if let Some(val) = env_millis("NXCP_COMMAND_TIMEOUT_MS") {
            self.session.command_timeout = val;
        }

        if let Some(val) = env_millis("NXCP_RECEIVE_TIMEOUT_MS") {
            self.session.receive_timeout = val;
        }

        if let Some(val) = env_millis("NXCP_KEEPALIVE_INTERVAL_MS") {
            self.session.keepalive_interval = val;
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.session.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

/// Session behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Server to connect to, `host` or `host:port`
    pub server_address: String,

    /// Default wait for a command reply
    #[serde(with = "duration_serde")]
    pub command_timeout: Duration,

    /// Idle read timeout; the connection is dropped after this much silence
    #[serde(with = "duration_serde")]
    pub receive_timeout: Duration,

    /// Keepalive period; zero disables the keepalive task
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// How long unclaimed replies are kept
    #[serde(with = "duration_serde")]
    pub hold_time: Duration,

    /// Opcodes delivered to the notification callback instead of the wait queue
    pub notification_codes: Vec<u16>,

    /// Request encryption during connect
    pub encryption: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_address: format!("127.0.0.1:{DEFAULT_PORT}"),
            command_timeout: timeout::COMMAND_TIMEOUT,
            receive_timeout: timeout::RECEIVE_TIMEOUT,
            keepalive_interval: timeout::KEEPALIVE_INTERVAL,
            hold_time: timeout::HOLD_TIME,
            notification_codes: vec![cmd::NOTIFY],
            encryption: ENABLE_ENCRYPTION,
        }
    }
}

impl SessionConfig {
    /// Splits `server_address` into host and port, defaulting the port.
    pub fn host_and_port(&self) -> Result<(String, u16)> {
        parse_address(&self.server_address)
    }

    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if parse_address(&self.server_address).is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected 'host' or 'host:port')",
                self.server_address
            ));
        }

        if self.command_timeout.as_millis() < 10 {
            errors.push("Command timeout too short (minimum: 10ms)".to_string());
        } else if self.command_timeout.as_secs() > 3600 {
            errors.push("Command timeout too long (maximum: 1 hour)".to_string());
        }

        if self.receive_timeout.as_millis() < 100 {
            errors.push("Receive timeout too short (minimum: 100ms)".to_string());
        }

        if !self.keepalive_interval.is_zero() {
            if self.keepalive_interval.as_millis() < 100 {
                errors.push("Keepalive interval too short (minimum: 100ms)".to_string());
            } else if self.keepalive_interval >= self.receive_timeout {
                errors.push(
                    "Keepalive interval must be shorter than the receive timeout".to_string(),
                );
            }
        }

        if self.hold_time < self.command_timeout {
            errors.push("Hold time should not be shorter than the command timeout".to_string());
        }

        errors
    }
}

/// Splits `host[:port]`; bracketed IPv6 literals are accepted.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let invalid = || ProtocolError::ConfigError(format!("{}: {address}", constants::ERR_INVALID_ADDRESS));

    if let Ok(sock) = address.parse::<std::net::SocketAddr>() {
        return Ok((sock.ip().to_string(), sock.port()));
    }
    if address.parse::<std::net::IpAddr>().is_ok() {
        return Ok((address.to_string(), DEFAULT_PORT));
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            let port = port.parse::<u16>().map_err(|_| invalid())?;
            Ok((host.to_string(), port))
        }
        None if !address.is_empty() => Ok((address.to_string(), DEFAULT_PORT)),
        _ => Err(invalid()),
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Upper bound on a single socket write
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,

    /// Hard cap on a single frame, in bytes
    pub max_message_size: usize,

    /// Compress outgoing bodies over the threshold when it helps
    pub compression_enabled: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: timeout::CONNECT_TIMEOUT,
            send_timeout: timeout::SEND_TIMEOUT,
            max_message_size: DEFAULT_MAX_FRAME_SIZE,
            compression_enabled: ENABLE_COMPRESSION,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        if self.send_timeout.as_millis() < 100 {
            errors.push("Send timeout too short (minimum: 100ms)".to_string());
        }

        if self.max_message_size < 1024 {
            errors.push("Max message size too small (minimum: 1 KB)".to_string());
        } else if self.max_message_size > u32::MAX as usize {
            errors.push(format!(
                "Max message size too large: {} bytes (must fit in 32 bits)",
                self.max_message_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Include the module path in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_format: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.json_format && !self.with_target {
            errors.push("JSON logs without targets cannot be attributed to a module".to_string());
        }
        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_ascii_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
