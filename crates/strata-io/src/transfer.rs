//! Full-transfer read and write.
//!
//! A single `read(2)` or `write(2)` may move fewer bytes than asked, or be
//! interrupted by a signal before moving any. These helpers loop until the
//! whole buffer has been transferred, retrying `EINTR` transparently, and turn
//! a transfer that can make no further progress into an error.

use std::io::{ErrorKind, Read, Write};

use crate::IoError;

/// Reads exactly `buf.len()` bytes from `reader`.
///
/// Fails with [`IoError::UnexpectedEof`] if end of file comes first.
pub fn read_fully<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), IoError> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => {
                return Err(IoError::UnexpectedEof {
                    read,
                    expected: buf.len(),
                });
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(IoError::handle("read", e)),
        }
    }
    Ok(())
}

/// Writes all of `buf` to `writer`.
///
/// Fails with [`IoError::ShortWrite`] if the writer stops accepting bytes.
pub fn write_fully<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> Result<(), IoError> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(IoError::ShortWrite {
                    written,
                    expected: buf.len(),
                });
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(IoError::handle("write", e)),
        }
    }
    Ok(())
}

/// Positional variant of [`read_fully`]; does not move the file offset.
#[cfg(unix)]
pub fn read_fully_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> Result<(), IoError> {
    use std::os::unix::fs::FileExt;

    let mut read = 0;
    while read < buf.len() {
        match file.read_at(&mut buf[read..], offset + read as u64) {
            Ok(0) => {
                return Err(IoError::UnexpectedEof {
                    read,
                    expected: buf.len(),
                });
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(IoError::handle("pread", e)),
        }
    }
    Ok(())
}

/// Positional variant of [`write_fully`]; does not move the file offset.
#[cfg(unix)]
pub fn write_fully_at(file: &std::fs::File, buf: &[u8], offset: u64) -> Result<(), IoError> {
    use std::os::unix::fs::FileExt;

    let mut written = 0;
    while written < buf.len() {
        match file.write_at(&buf[written..], offset + written as u64) {
            Ok(0) => {
                return Err(IoError::ShortWrite {
                    written,
                    expected: buf.len(),
                });
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(IoError::handle("pwrite", e)),
        }
    }
    Ok(())
}
