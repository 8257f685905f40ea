//! # strata-io: segment-file I/O for the Strata replicated log
//!
//! Everything the log needs from the filesystem lives here:
//!
//! - [`StorageDir`] and [`FileName`]: validated directory and file names
//! - file lifecycle on a directory: create, atomic `make_file`, rename,
//!   truncate, unlink, all followed by the directory `fsync` that makes
//!   them durable
//! - [`read_fully`] / [`write_fully`]: full-length transfers that turn short
//!   reads and writes into errors
//! - [`is_filled_with_trailing_zeros`]: recovery check for preallocated
//!   segment tails
//! - [`probe_io_capabilities`]: what direct and asynchronous I/O the
//!   filesystem under a directory actually supports
//! - [`AioContext`] and [`EventCounter`]: the Linux kernel AIO interface and
//!   its eventfd completion counter
//! - [`parse_address`]: peer address parsing
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              strata log / cli            │
//! └────────┬───────────────┬─────────────────┘
//!          │               │
//! ┌────────┴──────┐ ┌──────┴────────────────┐
//! │ StorageDir    │ │ probe ──▶ IoMode      │
//! │ file / dir    │ │   │                   │
//! │ transfer      │ │   ▼                   │
//! │ zeros         │ │ AioContext ─▶ eventfd │
//! └───────────────┘ └───────────────────────┘
//! ```
//!
//! Kernel AIO, eventfd and `fstatfs` are Linux-only. On other platforms the
//! probe reports no direct or asynchronous support and the log falls back
//! to buffered I/O.

mod addr;
mod aligned;
mod dir;
mod error;
mod file;
mod mode;
mod path;
mod probe;
mod transfer;
mod zeros;

#[cfg(target_os = "linux")]
mod aio;
#[cfg(target_os = "linux")]
mod event;
#[cfg(target_os = "linux")]
mod sys;

pub use addr::{
    DEFAULT_PORT, parse as parse_address, parse_with_default_port as parse_address_with_default_port,
};
pub use aligned::AlignedBuffer;
pub use dir::{ensure_dir, sync_dir};
pub use error::{ErrorKind, IoError};
pub use file::{OpenFlags, TEMP_PREFIX};
pub use mode::{IoMode, IoPreference};
pub use path::{DIR_MAX, FILENAME_MAX, FileName, PATH_MAX, StorageDir};
pub use probe::{
    IoCapabilities, PROBE_PREFIX, ProbeOutcome, probe_io_capabilities, probe_or_conservative,
};
pub use transfer::{read_fully, write_fully};
#[cfg(unix)]
pub use transfer::{read_fully_at, write_fully_at};
pub use zeros::{is_at_eof, is_filled_with_trailing_zeros, preallocate};

#[cfg(target_os = "linux")]
pub use aio::{AioCompletion, AioContext, AioOp, AioOpKind, ContextBusy};
#[cfg(target_os = "linux")]
pub use event::EventCounter;

#[cfg(test)]
mod tests;
