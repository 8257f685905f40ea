//! Event counter for AIO completion notification.
//!
//! An [`EventCounter`] wraps a non-blocking `eventfd(2)`. When attached to an
//! [`crate::AioContext`], the kernel increments it once per completed
//! request, which makes the counter readable. It implements
//! [`mio::event::Source`], so the caller's event loop can wait for AIO
//! completions next to its sockets instead of dedicating a thread to
//! `io_getevents`.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};

use crate::IoError;

/// A kernel-backed counter that becomes readable when non-zero.
#[derive(Debug)]
pub struct EventCounter {
    file: File,
}

impl EventCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Result<Self, IoError> {
        let fd = crate::sys::eventfd(0).map_err(|e| IoError::handle("eventfd", e))?;
        Ok(Self {
            file: File::from(fd),
        })
    }

    /// Returns the current count and resets it to zero.
    ///
    /// Returns 0 without blocking when nothing has been signalled.
    pub fn drain(&self) -> Result<u64, IoError> {
        let mut buf = [0u8; 8];
        loop {
            match (&self.file).read(&mut buf) {
                Ok(8) => return Ok(u64::from_ne_bytes(buf)),
                Ok(n) => {
                    return Err(IoError::UnexpectedEof {
                        read: n,
                        expected: 8,
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(IoError::handle("read eventfd", e)),
            }
        }
    }

    /// Adds `n` to the counter, waking any registered poller.
    pub fn signal(&self, n: u64) -> Result<(), IoError> {
        loop {
            match (&self.file).write(&n.to_ne_bytes()) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(IoError::handle("write eventfd", e)),
            }
        }
    }
}

impl AsFd for EventCounter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for EventCounter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Source for EventCounter {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.file.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.file.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.file.as_raw_fd()).deregister(registry)
    }
}
