//! Structured logging setup.
//!
//! The library itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call [`init_logging`] with a [`LoggingConfig`].
//! `RUST_LOG` takes precedence over the configured level when set.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

/// Build the filter for `config`, letting `RUST_LOG` override it
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()))
}

/// Build the output sink. Console and file output can be combined.
pub fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter> {
    let file = if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError(
                "log_file_path must be specified when log_to_file is true".to_string(),
            )
        })?;
        Some(OpenOptions::new().create(true).append(true).open(path)?)
    } else {
        None
    };

    match (config.log_to_console, file) {
        (true, Some(file)) => Ok(BoxMakeWriter::new(std::io::stderr.and(Mutex::new(file)))),
        (false, Some(file)) => Ok(BoxMakeWriter::new(Mutex::new(file))),
        (true, None) => Ok(BoxMakeWriter::new(std::io::stderr)),
        (false, None) => Err(ProtocolError::ConfigError(
            "At least one logging output (console or file) must be enabled".to_string(),
        )),
    }
}

/// Install a global fmt subscriber.
///
/// Fails when the sink cannot be built or a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let writer = make_writer(config)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_writer(writer)
        .with_target(true);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    tracing::info!(app = %config.app_name, "Logging initialized");
    Ok(())
}
