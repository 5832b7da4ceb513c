//! Configuration
//!
//! Settings shared by listeners and clients, loadable from a TOML file at
//! `$XDG_CONFIG_HOME/localpipe/localpipe.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the binary)
//! 2. Environment variables (`LOCALPIPE_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! port = 6003
//! cycle_time_ms = 5000
//! handshake_timeout_ms = 5000
//! connect_timeout_ms = 5000
//! max_frame_size = 10485760
//! max_connections = 64
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::DEFAULT_MAX_FRAME_SIZE;

/// Default port, shared by the demo host and client
pub const DEFAULT_PORT: u16 = 6003;

/// Default cycle time bounding accept, poll, and dequeue waits
pub const DEFAULT_CYCLE_TIME_MS: u64 = 5000;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("failed to read config file at {path}: {source}")]
    Read {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Listener and client settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Loopback port the listener binds and clients connect to (0 = ephemeral)
    pub port: u16,

    /// Upper bound on each wait in the service loops, in milliseconds
    ///
    /// Controls how quickly cancellation is noticed.
    pub cycle_time_ms: u64,

    /// Bound on the authentication handshake, in milliseconds
    pub handshake_timeout_ms: u64,

    /// Bound on the client's TCP connect, in milliseconds
    pub connect_timeout_ms: u64,

    /// Largest accepted payload in bytes
    pub max_frame_size: usize,

    /// Live connections a listener keeps before refusing new ones
    pub max_connections: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cycle_time_ms: DEFAULT_CYCLE_TIME_MS,
            handshake_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: 64,
        }
    }
}

impl PipeConfig {
    /// Cycle time as a `Duration`
    #[must_use]
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    /// Handshake timeout as a `Duration`
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Connect timeout as a `Duration`
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Overlay `LOCALPIPE_*` environment variables onto this config
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        env_override("LOCALPIPE_PORT", &mut self.port);
        env_override("LOCALPIPE_CYCLE_TIME_MS", &mut self.cycle_time_ms);
        env_override(
            "LOCALPIPE_HANDSHAKE_TIMEOUT_MS",
            &mut self.handshake_timeout_ms,
        );
        env_override("LOCALPIPE_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms);
        env_override("LOCALPIPE_MAX_FRAME_SIZE", &mut self.max_frame_size);
        env_override("LOCALPIPE_MAX_CONNECTIONS", &mut self.max_connections);
    }

    /// Reject settings the services cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_time_ms == 0 {
            return Err(ConfigError::Invalid(
                "cycle_time_ms must be greater than zero".to_string(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_size must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(var, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

/// Default config file location (`$XDG_CONFIG_HOME/localpipe/localpipe.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("localpipe").join("localpipe.toml"))
}

/// Parse a config from TOML text, without environment overrides
///
/// # Errors
///
/// Returns `ConfigError::Parse` for malformed TOML.
pub fn parse_config(text: &str) -> Result<PipeConfig, ConfigError> {
    Ok(toml::from_str(text)?)
}

/// Load file, then environment, then validate
///
/// `None` uses [`default_config_path`]. A missing file is not an error; the
/// defaults are used instead.
///
/// # Errors
///
/// `Read` if the file exists but cannot be read, `Parse` if it is not valid
/// TOML, `Invalid` if the merged result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<PipeConfig, ConfigError> {
    let mut config = match path.or_else(default_config_path) {
        Some(path) if path.exists() => read_config_file(&path)?,
        Some(path) => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            PipeConfig::default()
        }
        None => PipeConfig::default(),
    };

    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<PipeConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&text)?;
    tracing::info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PipeConfig::default();
        assert_eq!(config.port, 6003);
        assert_eq!(config.cycle_time(), Duration::from_secs(5));
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = parse_config("port = 7001\ncycle_time_ms = 250\n").unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.cycle_time_ms, 250);
        assert_eq!(config.handshake_timeout_ms, 5000);
    }

    #[test]
    fn test_parse_empty_toml() {
        assert_eq!(parse_config("").unwrap(), PipeConfig::default());
    }

    #[test]
    fn test_malformed_toml() {
        let result = parse_config("port = \"not a number\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_rejects_zero_cycle() {
        let config = PipeConfig {
            cycle_time_ms: 0,
            ..PipeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cycle_time_ms"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_connections = 3").unwrap();
        writeln!(file, "max_frame_size = 4096").unwrap();

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.max_frame_size, 4096);
    }

    #[test]
    fn test_load_invalid_file_value() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_frame_size = 0").unwrap();

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.max_connections, PipeConfig::default().max_connections);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PipeConfig {
            port: 0,
            cycle_time_ms: 100,
            ..PipeConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(parse_config(&text).unwrap(), config);
    }
}
