//! I/O error types.
//!
//! Every fallible operation in this crate returns [`IoError`]. Variants carry
//! the name of the failing operation and the path (or address) involved, so the
//! `Display` output doubles as the diagnostic message surfaced to the replicated
//! log. [`IoError::kind`] exposes the machine-checkable classification.

use std::path::PathBuf;

/// Classification of an [`IoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The file or directory does not exist.
    NotFound,
    /// The OS refused access.
    PermissionDenied,
    /// The target name is already taken.
    AlreadyExists,
    /// Path too long, malformed address, misuse of an AIO context.
    InvalidArgument,
    /// Short transfer, failed sync, rejected direct I/O, any other OS failure.
    Io,
    /// Direct or asynchronous I/O is unavailable on this directory.
    Unsupported,
    /// A syscall was interrupted. Full transfers and completion polling retry
    /// these internally, so callers never observe this kind from them.
    Interrupted,
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            std::io::ErrorKind::InvalidInput => Self::InvalidArgument,
            std::io::ErrorKind::Unsupported => Self::Unsupported,
            std::io::ErrorKind::Interrupted => Self::Interrupted,
            _ => Self::Io,
        }
    }
}

/// Errors from the storage I/O layer.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// An OS call on a path failed.
    #[error("{op} {}: {source}", path.display())]
    Os {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// An OS call on an already-open handle failed.
    #[error("{op}: {source}")]
    Handle {
        op: &'static str,
        source: std::io::Error,
    },

    /// A directory or filename exceeds its length limit.
    #[error("{what} too long: {len} bytes (max {max})")]
    NameTooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },

    /// A filename is empty or contains a separator or NUL byte.
    #[error("invalid filename {name:?}")]
    InvalidFilename { name: String },

    /// The path exists but is not a directory.
    #[error("{} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// End of file was reached before the requested byte count was read.
    #[error("short read: got {read} of {expected} bytes")]
    UnexpectedEof { read: usize, expected: usize },

    /// The OS accepted zero bytes before the requested count was written.
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// Direct or asynchronous I/O is unavailable.
    #[error("{0}")]
    Unsupported(String),

    /// More operations submitted than the AIO context was created for.
    #[error("aio context full: {in_flight} in flight, {requested} requested, capacity {capacity}")]
    ContextFull {
        in_flight: usize,
        requested: usize,
        capacity: usize,
    },

    /// A network address could not be parsed.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },
}

impl IoError {
    /// Wraps an OS error raised while operating on `path`.
    pub(crate) fn os(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Os {
            op,
            path: path.into(),
            source,
        }
    }

    /// Wraps an OS error raised on an open handle.
    pub(crate) fn handle(op: &'static str, source: std::io::Error) -> Self {
        Self::Handle { op, source }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Os { source, .. } | Self::Handle { source, .. } => os_kind(source),
            Self::NameTooLong { .. }
            | Self::InvalidFilename { .. }
            | Self::ContextFull { .. }
            | Self::InvalidAddress { .. } => ErrorKind::InvalidArgument,
            Self::NotADirectory { .. } | Self::UnexpectedEof { .. } | Self::ShortWrite { .. } => {
                ErrorKind::Io
            }
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

/// Maps an OS error to an [`ErrorKind`], treating `EINVAL` from direct I/O
/// (misaligned buffer or offset) as a plain I/O failure.
fn os_kind(err: &std::io::Error) -> ErrorKind {
    #[cfg(target_os = "linux")]
    if err.raw_os_error() == Some(libc::EOPNOTSUPP) {
        return ErrorKind::Unsupported;
    }
    match ErrorKind::from(err.kind()) {
        ErrorKind::InvalidArgument if err.raw_os_error() == Some(libc::EINVAL) => ErrorKind::Io,
        kind => kind,
    }
}
