//! Core configuration.
//!
//! Every field has a default so an empty (or missing) TOML file is valid.
//!
//! ```toml
//! history_capacity = 5
//! message_capacity = 10
//! default_operation_timeout_ms = 30000
//!
//! [logging]
//! level = "info"
//! dir = "/var/log/inkdraft"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HISTORY_CAPACITY: usize = 5;
pub const DEFAULT_MESSAGE_CAPACITY: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Maximum number of undo snapshots kept per loaded document.
    pub history_capacity: usize,
    /// Maximum number of refinement conversation messages kept.
    pub message_capacity: usize,
    /// Timeout applied to workflow operations; 0 disables it.
    pub default_operation_timeout_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            default_operation_timeout_ms: 0,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Falls back to `default_log_level()` when unset.
    pub level: Option<String>,
    /// File logging is disabled when unset.
    pub dir: Option<PathBuf>,
}

impl CoreConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.message_capacity == 0 {
            return Err(ConfigError::Invalid(
                "message_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_operation_timeout(&self) -> Option<Duration> {
        match self.default_operation_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
