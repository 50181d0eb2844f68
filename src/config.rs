//! # Configuration Management
//!
//! Centralized configuration for the RPC dispatch engine.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Current supported message format version
pub const PROTOCOL_VERSION: u8 = 1;

/// Logical channel all RPC traffic is sent and received on
pub const DEFAULT_CHANNEL: u32 = 120;

/// Max allowed encoded message size (512 KB)
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Max messages drained from the transport per poll
pub const MAX_RECEIVE_BATCH: usize = 500;

/// Mask used by the mask-less send helpers
pub const DEFAULT_MASK: i32 = 0;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Dispatch session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
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

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(channel) = std::env::var("MYCELIUM_CHANNEL") {
            config.session.channel = channel.parse::<u32>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid MYCELIUM_CHANNEL '{channel}': {e}"))
            })?;
        }

        if let Ok(batch) = std::env::var("MYCELIUM_MAX_RECEIVE_BATCH") {
            config.session.max_receive_batch = batch.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!(
                    "Invalid MYCELIUM_MAX_RECEIVE_BATCH '{batch}': {e}"
                ))
            })?;
        }

        if let Ok(size) = std::env::var("MYCELIUM_MAX_MESSAGE_SIZE") {
            config.transport.max_message_size = size.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!(
                    "Invalid MYCELIUM_MAX_MESSAGE_SIZE '{size}': {e}"
                ))
            })?;
        }

        if let Ok(level) = std::env::var("MYCELIUM_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid MYCELIUM_LOG_LEVEL '{level}'"))
            })?;
        }

        Ok(config)
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

/// Dispatch session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Logical transport channel for RPC traffic
    pub channel: u32,

    /// Maximum number of messages handled per poll
    pub max_receive_batch: usize,

    /// Ignore messages from senders that are not in the member list
    pub drop_non_members: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            max_receive_batch: MAX_RECEIVE_BATCH,
            drop_non_members: true,
        }
    }
}

impl SessionConfig {
    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_receive_batch == 0 {
            errors.push("Max receive batch must be greater than 0".to_string());
        } else if self.max_receive_batch > 100_000 {
            errors.push(format!(
                "Max receive batch too large: {} (max recommended: 100,000)",
                self.max_receive_batch
            ));
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Maximum allowed encoded message size in bytes
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_message_size == 0 {
            errors.push("Max message size cannot be 0".to_string());
        } else if self.max_message_size < 64 {
            errors.push("Max message size too small (minimum: 64 bytes)".to_string());
        } else if self.max_message_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Max message size too large: {} bytes (maximum recommended: 16 MB)",
                self.max_message_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("mycelium-rpc"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
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
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
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
