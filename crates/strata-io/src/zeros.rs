//! Pre-allocation and trailing-zero detection.
//!
//! Segment files are pre-allocated before entries are written into them, so
//! after a crash the physical file length says nothing about where valid data
//! ends. Recovery reads entries until it reaches a position from which the
//! rest of the file is zero-filled, and treats that position as the real end.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::IoError;

/// Chunk size used when scanning for trailing zeros.
const SCAN_CHUNK: usize = 4096;

/// Returns true if every byte from the current offset to end of file is zero.
///
/// The offset is restored before returning, so recovery can keep reading from
/// where it stopped. An offset already at end of file yields `true`.
pub fn is_filled_with_trailing_zeros<S: Read + Seek + ?Sized>(
    stream: &mut S,
) -> Result<bool, IoError> {
    let start = stream
        .stream_position()
        .map_err(|e| IoError::handle("lseek", e))?;

    let result = scan_for_non_zero(stream);

    stream
        .seek(SeekFrom::Start(start))
        .map_err(|e| IoError::handle("lseek", e))?;
    result
}

fn scan_for_non_zero<R: Read + ?Sized>(reader: &mut R) -> Result<bool, IoError> {
    let mut chunk = [0u8; SCAN_CHUNK];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(true),
            Ok(n) => {
                if chunk[..n].iter().any(|&b| b != 0) {
                    return Ok(false);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(IoError::handle("read", e)),
        }
    }
}

/// Returns true if the current offset equals the stream length.
///
/// Errors while querying the offset are logged and reported as "not at EOF".
pub fn is_at_eof<S: Seek + ?Sized>(stream: &mut S) -> bool {
    let offset = match stream.stream_position() {
        Ok(offset) => offset,
        Err(e) => {
            tracing::warn!(error = %e, "eof check: cannot read stream position");
            return false;
        }
    };
    let end = match stream.seek(SeekFrom::End(0)) {
        Ok(end) => end,
        Err(e) => {
            tracing::warn!(offset, error = %e, "eof check: cannot seek to end");
            return false;
        }
    };
    if let Err(e) = stream.seek(SeekFrom::Start(offset)) {
        tracing::warn!(offset, error = %e, "eof check: cannot restore stream position");
        return false;
    }
    offset == end
}

/// Reserves `len` bytes of disk space starting at `offset`.
///
/// The reserved range reads back as zeros. Filesystems that cannot reserve
/// space (older ZFS, some network filesystems) fail with
/// [`crate::ErrorKind::Unsupported`].
#[cfg(target_os = "linux")]
pub fn preallocate(file: &File, offset: u64, len: u64) -> Result<(), IoError> {
    use std::os::fd::AsFd;

    loop {
        match crate::sys::fallocate(file.as_fd(), offset, len) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(IoError::handle("fallocate", e)),
        }
    }
}

/// Reserves space by extending the file; the portable fallback only grows.
#[cfg(not(target_os = "linux"))]
pub fn preallocate(file: &File, offset: u64, len: u64) -> Result<(), IoError> {
    let current = file
        .metadata()
        .map_err(|e| IoError::handle("fstat", e))?
        .len();
    let wanted = offset + len;
    if wanted > current {
        file.set_len(wanted)
            .map_err(|e| IoError::handle("ftruncate", e))?;
    }
    Ok(())
}
