//! Configuration management for Strata
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (STRATA_* prefix, `__` between nested keys)
//! 2. strata.local.toml (gitignored, local overrides)
//! 3. strata.toml (git-tracked, project config)
//! 4. ~/.config/strata/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_io::{IoPreference, StorageDir};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{ConfigLayer, Paths};

/// Main Strata configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the log's segment and metadata files.
    pub data_dir: PathBuf,
    pub io_mode: IoPreference,
    /// Slots in the kernel AIO queue.
    pub aio_queue_depth: u32,
    /// Bytes reserved up front for each open segment.
    pub preallocate_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".strata/data"),
            io_mode: IoPreference::Auto,
            aio_queue_depth: 64,
            preallocate_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub address: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl StrataConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.storage.data_dir.is_relative() {
            self.storage.data_dir = base.join(&self.storage.data_dir);
        }
    }

    /// Checks values the storage layer would otherwise reject at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.aio_queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "storage.aio_queue_depth must be at least 1".to_string(),
            ));
        }

        StorageDir::new(&self.storage.data_dir)
            .map_err(|e| ConfigError::ValidationError(format!("storage.data_dir: {e}")))?;

        strata_io::parse_address(&self.network.address)
            .map_err(|e| ConfigError::ValidationError(format!("network.address: {e}")))?;

        Ok(())
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}
