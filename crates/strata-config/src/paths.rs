//! Where configuration files live and the order they are layered in.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// A configuration file source. Later layers override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigLayer {
    /// Per-user defaults (`~/.config/strata/config.toml`).
    User,
    /// Project settings, usually checked in (`strata.toml`).
    Project,
    /// Overrides for this machine only (`strata.local.toml`, gitignored).
    Local,
}

impl ConfigLayer {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::User => "config.toml",
            Self::Project => "strata.toml",
            Self::Local => "strata.local.toml",
        }
    }
}

/// Locates the configuration files a Strata node reads.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("com", "Strata", "strata"),
        }
    }

    /// `config.toml` in the per-user config directory.
    ///
    /// Fails when no home directory can be determined.
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().join(ConfigLayer::User.file_name()))
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// The configuration files that exist for `project_dir`, lowest
    /// precedence first.
    ///
    /// The user layer is skipped when `include_user` is false or no home
    /// directory is known. Entries that are not regular files are ignored.
    pub fn config_layers(
        &self,
        project_dir: &Path,
        include_user: bool,
    ) -> Vec<(ConfigLayer, PathBuf)> {
        let mut layers = Vec::with_capacity(3);
        if include_user {
            if let Ok(file) = self.user_config_file() {
                layers.push((ConfigLayer::User, file));
            }
        }
        for layer in [ConfigLayer::Project, ConfigLayer::Local] {
            layers.push((layer, project_dir.join(layer.file_name())));
        }
        layers.retain(|(_, path)| path.is_file());
        layers
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
