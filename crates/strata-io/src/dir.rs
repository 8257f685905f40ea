//! Directory manager.
//!
//! Creating, renaming or unlinking a file only changes the directory entry in
//! memory; the entry survives a crash once the directory itself is synced.
//! [`sync_dir`] is called by every lifecycle operation that changes entries.

use std::fs::{self, DirBuilder, File};
use std::io::ErrorKind;
use std::path::Path;

use crate::IoError;

/// Permission bits for directories created by [`ensure_dir`].
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;

/// Ensures `path` exists and is a directory, creating it if absent.
pub fn ensure_dir(path: &Path) -> Result<(), IoError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(IoError::NotADirectory {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let mut builder = DirBuilder::new();
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(DIR_MODE);
            }
            builder
                .create(path)
                .map_err(|e| IoError::os("mkdir", path, e))?;
            tracing::debug!(path = %path.display(), "created directory");
            Ok(())
        }
        Err(e) => Err(IoError::os("stat", path, e)),
    }
}

/// Flushes the entries of directory `path` to stable storage.
pub fn sync_dir(path: &Path) -> Result<(), IoError> {
    let dir = File::open(path).map_err(|e| IoError::os("open directory", path, e))?;
    dir.sync_all()
        .map_err(|e| IoError::os("fsync directory", path, e))
}
