//! Length-validated directory and filename values.
//!
//! Paths are checked once, when a [`StorageDir`] or [`FileName`] is built.
//! Every later join is then guaranteed to fit in [`PATH_MAX`] bytes, so
//! lifecycle operations never re-validate and never reach a syscall with an
//! oversized path.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::IoError;

/// Maximum size of a full path, including a trailing NUL.
pub const PATH_MAX: usize = 1024;

/// Maximum length of a filename.
pub const FILENAME_MAX: usize = 128;

/// Length of the path separator.
const SEPARATOR_LEN: usize = 1;

/// Maximum length of a directory path, leaving room for a separator, a
/// maximal filename and a trailing NUL.
pub const DIR_MAX: usize = PATH_MAX - SEPARATOR_LEN - FILENAME_MAX - 1;

/// A filename of at most [`FILENAME_MAX`] bytes with no separator or NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName(String);

impl FileName {
    /// Validates `name` as a single path component.
    pub fn new(name: impl Into<String>) -> Result<Self, IoError> {
        let name = name.into();
        if name.len() > FILENAME_MAX {
            return Err(IoError::NameTooLong {
                what: "filename",
                len: name.len(),
                max: FILENAME_MAX,
            });
        }
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return Err(IoError::InvalidFilename { name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for FileName {
    type Error = IoError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl AsRef<Path> for FileName {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directory path of at most [`DIR_MAX`] bytes.
///
/// All file lifecycle operations are methods on this type (see
/// [`crate::file`]); it does not hold the directory open.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageDir {
    path: PathBuf,
}

impl StorageDir {
    /// Validates the length of `path`. Does not touch the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, IoError> {
        let path = path.into();
        let len = path.as_os_str().len();
        if len > DIR_MAX {
            return Err(IoError::NameTooLong {
                what: "directory",
                len,
                max: DIR_MAX,
            });
        }
        if path.as_os_str().is_empty() {
            return Err(IoError::InvalidFilename {
                name: String::new(),
            });
        }
        Ok(Self { path })
    }

    /// Validates `path`, creating the directory if it does not exist.
    pub fn ensure(path: impl Into<PathBuf>) -> Result<Self, IoError> {
        let dir = Self::new(path)?;
        crate::dir::ensure_dir(&dir.path)?;
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Joins `name` onto this directory.
    ///
    /// The result is at most `PATH_MAX - 1` bytes by construction.
    pub fn join(&self, name: &FileName) -> PathBuf {
        let joined = self.path.join(name);
        debug_assert!(joined.as_os_str().len() < PATH_MAX);
        joined
    }
}

impl AsRef<Path> for StorageDir {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}
