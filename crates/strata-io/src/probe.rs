//! Filesystem I/O capability probing.
//!
//! Whether `O_DIRECT` works, which alignment it needs, and whether kernel AIO
//! really completes asynchronously all depend on the filesystem behind a
//! directory, not on the platform. The prober finds out empirically with a
//! scratch file:
//!
//! 1. Create `.probe-XXXXXX` and pre-allocate one block. Filesystems that cannot
//!    pre-allocate get `(0, false)`.
//! 2. Reopen it with `O_DIRECT`. `EINVAL` means no direct I/O: `(0, false)`.
//! 3. Write one zeroed block at offset 0, starting with the filesystem's
//!    reported block size and halving down to 512 bytes while the kernel
//!    rejects the alignment.
//! 4. Submit one `RWF_NOWAIT | RWF_DSYNC` write through a one-slot AIO
//!    context. A completion of `-EAGAIN` means the kernel would have had to
//!    block, i.e. it services AIO synchronously on this filesystem.
//!    Memory-backed filesystems are reported as synchronous regardless.
//!
//! The scratch file and the AIO context are released on every path.

use serde::{Deserialize, Serialize};

use crate::path::{FileName, StorageDir};
use crate::IoError;

/// Prefix of the scratch file created in the probed directory.
pub const PROBE_PREFIX: &str = ".probe-";

/// What a directory's filesystem supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IoCapabilities {
    /// Alignment for direct I/O, or 0 if direct I/O is unavailable.
    pub direct_io_block_size: usize,
    /// True if kernel AIO completes without blocking the submitter.
    pub async_io_supported: bool,
}

impl IoCapabilities {
    /// Buffered, synchronous I/O only.
    pub const CONSERVATIVE: Self = Self {
        direct_io_block_size: 0,
        async_io_supported: false,
    };

    pub fn direct_io_supported(&self) -> bool {
        self.direct_io_block_size > 0
    }
}

/// Result of [`probe_or_conservative`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub capabilities: IoCapabilities,
    /// Why the conservative defaults were used, if probing failed.
    pub diagnostic: Option<String>,
}

/// Probes `dir`, which must exist.
pub fn probe_io_capabilities(dir: &StorageDir) -> Result<IoCapabilities, IoError> {
    let capabilities = imp::probe(dir)?;
    tracing::info!(
        dir = %dir.path().display(),
        direct_io_block_size = capabilities.direct_io_block_size,
        async_io_supported = capabilities.async_io_supported,
        "probed io capabilities"
    );
    Ok(capabilities)
}

/// Probes `dir`, falling back to [`IoCapabilities::CONSERVATIVE`] on error.
pub fn probe_or_conservative(dir: &StorageDir) -> ProbeOutcome {
    match probe_io_capabilities(dir) {
        Ok(capabilities) => ProbeOutcome {
            capabilities,
            diagnostic: None,
        },
        Err(e) => {
            tracing::warn!(
                dir = %dir.path().display(),
                error = %e,
                "io capability probe failed, using buffered io"
            );
            ProbeOutcome {
                capabilities: IoCapabilities::CONSERVATIVE,
                diagnostic: Some(format!("probe io capabilities: {e}")),
            }
        }
    }
}

/// Scratch file removed on drop.
struct ProbeFile<'a> {
    dir: &'a StorageDir,
    name: FileName,
    file: std::fs::File,
}

impl<'a> ProbeFile<'a> {
    fn create(dir: &'a StorageDir) -> Result<Self, IoError> {
        let (name, file) = dir.make_temp_file(PROBE_PREFIX)?;
        Ok(Self { dir, name, file })
    }
}

impl Drop for ProbeFile<'_> {
    fn drop(&mut self) {
        self.dir.try_unlink_file(&self.name);
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::fs::File;
    use std::io;
    use std::os::fd::AsFd;
    use std::os::unix::fs::{FileExt, MetadataExt};

    use super::{IoCapabilities, ProbeFile};
    use crate::aio::{AioContext, AioOp};
    use crate::file::OpenFlags;
    use crate::path::StorageDir;
    use crate::zeros::preallocate;
    use crate::{AlignedBuffer, ErrorKind, IoError, sys};

    /// Size pre-allocated for the scratch file.
    const PROBE_SIZE: u64 = 4096;

    /// Alignments tried after the filesystem's reported block size.
    const FALLBACK_BLOCK_SIZES: [usize; 4] = [4096, 2048, 1024, 512];

    /// Largest reported block size taken at face value.
    const MAX_BLOCK_SIZE: usize = 64 * 1024;

    pub(super) fn probe(dir: &StorageDir) -> Result<IoCapabilities, IoError> {
        let probe = ProbeFile::create(dir)?;
        let magic = sys::fs_magic(probe.file.as_fd()).ok();
        let fs = magic.map_or("unknown", sys::fs_name);

        match preallocate(&probe.file, 0, PROBE_SIZE) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Unsupported => {
                tracing::debug!(fs, "fallocate unsupported, assuming buffered io only");
                return Ok(IoCapabilities::CONSERVATIVE);
            }
            Err(e) => return Err(e),
        }

        let Some(direct) = open_direct(dir, &probe, fs)? else {
            return Ok(IoCapabilities::CONSERVATIVE);
        };

        let reported = probe
            .file
            .metadata()
            .map_err(|e| IoError::handle("fstat", e))?
            .blksize();
        let block_size = probe_block_size(&direct, usize::try_from(reported).unwrap_or(0))?;
        if block_size == 0 {
            tracing::debug!(fs, "no direct io alignment accepted");
            return Ok(IoCapabilities::CONSERVATIVE);
        }

        let async_io_supported = if magic.is_some_and(sys::runs_aio_synchronously) {
            tracing::debug!(fs, "filesystem services aio synchronously");
            false
        } else {
            probe_async(&direct, block_size)?
        };

        Ok(IoCapabilities {
            direct_io_block_size: block_size,
            async_io_supported,
        })
    }

    /// Reopens the probe file with `O_DIRECT`; `None` if the filesystem refuses.
    fn open_direct(
        dir: &StorageDir,
        probe: &ProbeFile<'_>,
        fs: &str,
    ) -> Result<Option<File>, IoError> {
        match dir.open_file(&probe.name, OpenFlags::read_write().direct()) {
            Ok(file) => Ok(Some(file)),
            Err(IoError::Os { source, .. }) if source.raw_os_error() == Some(libc::EINVAL) => {
                tracing::debug!(fs, "direct io not supported");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the first alignment a direct write accepts, or 0.
    fn probe_block_size(file: &File, reported: usize) -> Result<usize, IoError> {
        let first = (reported.is_power_of_two() && (512..=MAX_BLOCK_SIZE).contains(&reported))
            .then_some(reported);
        let candidates = first.into_iter().chain(
            FALLBACK_BLOCK_SIZES
                .into_iter()
                .filter(|&size| first.is_none_or(|r| size < r)),
        );

        for size in candidates {
            let buf = AlignedBuffer::zeroed(size, size);
            match file.write_at(buf.as_slice(), 0) {
                Ok(n) if n == size => return Ok(size),
                Ok(n) => {
                    return Err(IoError::ShortWrite {
                        written: n,
                        expected: size,
                    });
                }
                Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                    tracing::trace!(size, "direct io alignment rejected");
                }
                Err(e) if e.raw_os_error() == Some(libc::EOPNOTSUPP) => return Ok(0),
                Err(e) => return Err(IoError::handle("probe direct write", e)),
            }
        }
        Ok(0)
    }

    /// Returns true if a non-blocking AIO write completes without `EAGAIN`.
    fn probe_async(file: &File, block_size: usize) -> Result<bool, IoError> {
        let mut ctx = match AioContext::new(1) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::debug!(error = %e, "kernel aio unavailable");
                return Ok(false);
            }
        };

        let op = AioOp::write(
            file.as_fd(),
            0,
            AlignedBuffer::zeroed(block_size, block_size),
        )?
        .nowait()
        .dsync();
        match ctx.submit(vec![op]) {
            Ok(rejected) if rejected.is_empty() => {}
            Ok(_) => return Ok(false),
            // Old kernels reject RWF_NOWAIT with EINVAL; some filesystems with EOPNOTSUPP.
            Err(IoError::Handle { source, .. })
                if matches!(
                    source.raw_os_error(),
                    Some(libc::EINVAL | libc::EOPNOTSUPP)
                ) =>
            {
                tracing::debug!(error = %source, "nowait aio submission rejected");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let completion = ctx
            .poll(1, 1, None)?
            .pop()
            .ok_or_else(|| IoError::handle("io_getevents", io::ErrorKind::UnexpectedEof.into()))?;
        if ctx.destroy().is_err() {
            tracing::error!("probe aio context still busy after poll");
        }

        match completion.result {
            Ok(n) if n == block_size => Ok(true),
            Ok(n) => Err(IoError::ShortWrite {
                written: n,
                expected: block_size,
            }),
            Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {
                tracing::debug!("nowait aio write would block, aio is not fully asynchronous");
                Ok(false)
            }
            Err(e) => Err(IoError::handle("probe async write", e)),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::{IoCapabilities, ProbeFile};
    use crate::IoError;
    use crate::path::StorageDir;

    pub(super) fn probe(dir: &StorageDir) -> Result<IoCapabilities, IoError> {
        // Writability check only; direct and kernel AIO are Linux-only.
        drop(ProbeFile::create(dir)?);
        Ok(IoCapabilities::CONSERVATIVE)
    }
}
