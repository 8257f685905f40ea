//! I/O mode selection.
//!
//! The log writes segments in one of three ways, chosen once per directory
//! from the probed [`IoCapabilities`] and the operator's [`IoPreference`]:
//!
//! - **Buffered**: plain `write(2)` through the page cache, then `fsync`.
//! - **Direct**: `O_DIRECT` writes of aligned blocks, issued from a worker.
//! - **Async**: `O_DIRECT` writes submitted through an [`crate::AioContext`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{IoCapabilities, IoError};

/// Operator preference for how segments are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoPreference {
    /// The fastest mode the directory supports.
    #[default]
    Auto,
    Buffered,
    Direct,
    Async,
}

impl FromStr for IoPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "buffered" => Ok(Self::Buffered),
            "direct" => Ok(Self::Direct),
            "async" => Ok(Self::Async),
            other => Err(format!(
                "unknown io mode {other:?} (expected auto, buffered, direct or async)"
            )),
        }
    }
}

impl fmt::Display for IoPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Buffered => "buffered",
            Self::Direct => "direct",
            Self::Async => "async",
        })
    }
}

/// The write strategy selected for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum IoMode {
    Buffered,
    Direct { block_size: usize },
    Async { block_size: usize },
}

impl IoMode {
    /// Picks the mode for `capabilities` honouring `preference`.
    ///
    /// An explicit preference the filesystem cannot satisfy is an error
    /// rather than a silent downgrade.
    pub fn select(
        capabilities: IoCapabilities,
        preference: IoPreference,
    ) -> Result<Self, IoError> {
        let block_size = capabilities.direct_io_block_size;
        match preference {
            IoPreference::Buffered => Ok(Self::Buffered),
            IoPreference::Auto if capabilities.async_io_supported && block_size > 0 => {
                Ok(Self::Async { block_size })
            }
            IoPreference::Auto if block_size > 0 => Ok(Self::Direct { block_size }),
            IoPreference::Auto => Ok(Self::Buffered),
            IoPreference::Direct if block_size > 0 => Ok(Self::Direct { block_size }),
            IoPreference::Direct => Err(IoError::Unsupported(
                "direct io is not supported by this filesystem".to_string(),
            )),
            IoPreference::Async if capabilities.async_io_supported && block_size > 0 => {
                Ok(Self::Async { block_size })
            }
            IoPreference::Async => Err(IoError::Unsupported(
                "asynchronous io is not supported by this filesystem".to_string(),
            )),
        }
    }

    /// Alignment writes must respect, or `None` for buffered I/O.
    pub fn block_size(self) -> Option<usize> {
        match self {
            Self::Buffered => None,
            Self::Direct { block_size } | Self::Async { block_size } => Some(block_size),
        }
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered => f.write_str("buffered"),
            Self::Direct { block_size } => write!(f, "direct ({block_size}-byte blocks)"),
            Self::Async { block_size } => write!(f, "async ({block_size}-byte blocks)"),
        }
    }
}
