//! Configuration loader with multi-source merging

use crate::{ConfigLayer, Paths, StrataConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "STRATA".to_string(),
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "STRATA")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/strata/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// The files [`ConfigLoader::load`] will read, lowest precedence first
    pub fn config_files(&self) -> Vec<(ConfigLayer, PathBuf)> {
        Paths::new().config_layers(&self.project_dir, self.user_config)
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<StrataConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = StrataConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config, 3. project config, 4. local overrides
        for (_, file) in self.config_files() {
            builder = builder.add_source(
                config::File::from(file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (STRATA_STORAGE__IO_MODE=direct)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Build and deserialize
        let config = builder.build().context("Failed to build configuration")?;

        let mut strata_config: StrataConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Resolve relative paths
        strata_config.resolve_paths(&self.project_dir);

        strata_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(strata_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> StrataConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
