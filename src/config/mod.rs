//! Configuration for psmatrix servers.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (psmatrix.toml)
//! ```toml
//! staleness = 2
//! load_path = "/var/lib/psmatrix/models"
//!
//! [io]
//! load_threads = 8
//! save_threads = 4
//! ```
//!
//! Per-matrix attributes (`matrix.load.path`, `matrix.load.threads`,
//! `matrix.save.threads`) override these server-wide defaults.

mod defaults;

pub use defaults::*;

use crate::model::Clock;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main configuration for a psmatrix server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixStoreConfig {
    /// Bulk I/O pool sizes
    pub io: IoConfig,
    /// Load path applied to matrices whose assignment does not carry one
    pub load_path: Option<PathBuf>,
    /// Allowed clock gap between a reader and a partition's aggregate clock
    pub staleness: Clock,
}

impl Default for MatrixStoreConfig {
    fn default() -> Self {
        Self {
            io: IoConfig::default(),
            load_path: None,
            staleness: DEFAULT_STALENESS,
        }
    }
}

impl MatrixStoreConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(MatrixStoreConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with PSMATRIX_ prefix
        figment = figment.merge(Env::prefixed("PSMATRIX_").split("__"));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: Self = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.io.load_threads == 0 || self.io.save_threads == 0 {
            return Err(ConfigError {
                message: "io thread counts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Server-wide bulk I/O pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub load_threads: usize,
    pub save_threads: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        let threads = default_io_threads();
        Self {
            load_threads: threads,
            save_threads: threads,
        }
    }
}

impl IoConfig {
    pub fn with_threads(load_threads: usize, save_threads: usize) -> Self {
        Self {
            load_threads,
            save_threads,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io: Option<IoOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness: Option<Clock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IoOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_threads: Option<usize>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

/// A matrix attribute whose value cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for matrix attribute {key}")]
pub struct AttributeError {
    pub key: String,
    pub value: String,
}

/// Parse a positive thread count attribute, falling back to `default` when
/// the attribute is absent.
pub fn thread_count(
    key: &str,
    raw: Option<&str>,
    default: usize,
) -> Result<usize, AttributeError> {
    let Some(raw) = raw else {
        return Ok(default.max(1));
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AttributeError {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MatrixStoreConfig::default();
        assert_eq!(config.staleness, DEFAULT_STALENESS);
        assert!(config.load_path.is_none());
        assert!(config.io.load_threads >= 1);
        assert!(config.io.load_threads <= MAX_DEFAULT_IO_THREADS);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = ConfigOverrides {
            io: Some(IoOverrides {
                load_threads: Some(3),
                save_threads: None,
            }),
            load_path: Some(PathBuf::from("/tmp/models")),
            staleness: Some(4),
        };
        let config = MatrixStoreConfig::load(None, overrides).unwrap();
        assert_eq!(config.io.load_threads, 3);
        assert_eq!(config.staleness, 4);
        assert_eq!(config.load_path, Some(PathBuf::from("/tmp/models")));
    }

    #[test]
    fn test_toml_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psmatrix.toml");
        std::fs::write(&path, "staleness = 2\n[io]\nsave_threads = 5\n").unwrap();
        let config = MatrixStoreConfig::from_env(path.to_str()).unwrap();
        assert_eq!(config.staleness, 2);
        assert_eq!(config.io.save_threads, 5);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let overrides = ConfigOverrides {
            io: Some(IoOverrides {
                load_threads: Some(0),
                save_threads: None,
            }),
            ..Default::default()
        };
        assert!(MatrixStoreConfig::load(None, overrides).is_err());
    }

    #[test]
    fn test_thread_count_attribute() {
        assert_eq!(thread_count(ATTR_LOAD_THREADS, None, 6), Ok(6));
        assert_eq!(thread_count(ATTR_LOAD_THREADS, Some(" 2 "), 6), Ok(2));
        assert!(thread_count(ATTR_LOAD_THREADS, Some("0"), 6).is_err());
        let err = thread_count(ATTR_SAVE_THREADS, Some("many"), 6).unwrap_err();
        assert_eq!(err.key, ATTR_SAVE_THREADS);
        assert_eq!(err.value, "many");
    }
}
