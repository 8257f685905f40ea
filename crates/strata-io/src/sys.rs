//! Raw Linux syscalls with no std equivalent.
//!
//! This is the only module (together with the submission path in
//! [`crate::aio`]) allowed to contain `unsafe`. Each wrapper converts the
//! C return convention into `io::Result` and takes borrowed descriptors, so
//! callers cannot pass a closed fd.

#![allow(unsafe_code)]

use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::time::Duration;

/// Kernel handle returned by `io_setup(2)` (`aio_context_t`).
pub(crate) type AioContextId = libc::c_ulong;

pub(crate) const IOCB_CMD_PREAD: u16 = 0;
pub(crate) const IOCB_CMD_PWRITE: u16 = 1;

/// Deliver completions to the eventfd in `Iocb::aio_resfd`.
pub(crate) const IOCB_FLAG_RESFD: u32 = 1 << 0;

/// Per-request write flags (`linux/fs.h`).
pub(crate) const RWF_DSYNC: i32 = 0x0000_0002;
pub(crate) const RWF_NOWAIT: i32 = 0x0000_0008;

/// Filesystem magic numbers (`linux/magic.h` and out-of-tree filesystems).
pub(crate) const TMPFS_MAGIC: i64 = 0x0102_1994;
pub(crate) const RAMFS_MAGIC: i64 = 0x8584_58f6;
pub(crate) const ZFS_MAGIC: i64 = 0x2fc1_2fc1;
pub(crate) const UBIFS_MAGIC: i64 = 0x2405_1905;
pub(crate) const BTRFS_MAGIC: i64 = 0x9123_683e;
pub(crate) const EXT4_MAGIC: i64 = 0xef53;
pub(crate) const XFS_MAGIC: i64 = 0x5846_5342;
pub(crate) const OVERLAYFS_MAGIC: i64 = 0x794c_7630;

/// `struct iocb` from `linux/aio_abi.h`.
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct Iocb {
    pub aio_data: u64,
    #[cfg(target_endian = "little")]
    pub aio_key: u32,
    #[cfg(target_endian = "little")]
    pub aio_rw_flags: i32,
    #[cfg(target_endian = "big")]
    pub aio_rw_flags: i32,
    #[cfg(target_endian = "big")]
    pub aio_key: u32,
    pub aio_lio_opcode: u16,
    pub aio_reqprio: i16,
    pub aio_fildes: u32,
    pub aio_buf: u64,
    pub aio_nbytes: u64,
    pub aio_offset: i64,
    pub aio_reserved2: u64,
    pub aio_flags: u32,
    pub aio_resfd: u32,
}

/// `struct io_event` from `linux/aio_abi.h`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct IoEvent {
    pub data: u64,
    pub obj: u64,
    pub res: i64,
    pub res2: i64,
}

fn check(rv: libc::c_long) -> io::Result<libc::c_long> {
    if rv < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rv)
    }
}

/// Creates a kernel AIO context able to hold `nr_events` requests.
pub(crate) fn io_setup(nr_events: u32) -> io::Result<AioContextId> {
    let mut ctx: AioContextId = 0;
    // SAFETY: `ctx` is a valid, zero-initialized out-pointer as io_setup requires.
    check(unsafe {
        libc::syscall(
            libc::SYS_io_setup,
            libc::c_uint::from(nr_events),
            &raw mut ctx,
        )
    })?;
    Ok(ctx)
}

/// Destroys a context created by [`io_setup`]. Blocks until outstanding
/// requests are cancelled or complete.
pub(crate) fn io_destroy(ctx: AioContextId) -> io::Result<()> {
    // SAFETY: the syscall only takes the context id by value.
    check(unsafe { libc::syscall(libc::SYS_io_destroy, ctx) })?;
    Ok(())
}

/// Submits the control blocks in `iocbs`, returning how many were accepted.
///
/// # Safety
///
/// Every pointer must reference a live `Iocb` whose buffer stays valid, and
/// is not otherwise accessed, until its completion is reaped.
pub(crate) unsafe fn io_submit(ctx: AioContextId, iocbs: &mut [*mut Iocb]) -> io::Result<usize> {
    // SAFETY: upheld by the caller.
    let n = check(unsafe {
        libc::syscall(
            libc::SYS_io_submit,
            ctx,
            iocbs.len() as libc::c_long,
            iocbs.as_mut_ptr(),
        )
    })?;
    Ok(n as usize)
}

/// Reaps between `min_nr` and `events.len()` completions.
///
/// `None` blocks indefinitely; a zero duration only checks.
pub(crate) fn io_getevents(
    ctx: AioContextId,
    min_nr: usize,
    events: &mut [IoEvent],
    timeout: Option<Duration>,
) -> io::Result<usize> {
    // SAFETY: an all-zero timespec is valid.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    let ts_ptr = match timeout {
        Some(t) => {
            ts.tv_sec = t.as_secs() as libc::time_t;
            ts.tv_nsec = t.subsec_nanos() as libc::c_long;
            &raw mut ts
        }
        None => std::ptr::null_mut(),
    };
    // SAFETY: `events` is writable for `events.len()` entries and `ts_ptr` is
    // either null or points at `ts`, which outlives the call.
    let n = check(unsafe {
        libc::syscall(
            libc::SYS_io_getevents,
            ctx,
            min_nr as libc::c_long,
            events.len() as libc::c_long,
            events.as_mut_ptr(),
            ts_ptr,
        )
    })?;
    Ok(n as usize)
}

/// Creates a non-blocking, close-on-exec eventfd.
pub(crate) fn eventfd(initval: u32) -> io::Result<OwnedFd> {
    // SAFETY: eventfd takes no pointers.
    let fd = unsafe { libc::eventfd(initval, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by eventfd and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// `fallocate(2)` with mode 0: reserve and extend.
pub(crate) fn fallocate(fd: BorrowedFd<'_>, offset: u64, len: u64) -> io::Result<()> {
    let offset = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let len =
        libc::off_t::try_from(len).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    // SAFETY: `fd` is a live borrowed descriptor; no pointers are passed.
    let rv = unsafe { libc::fallocate(fd.as_raw_fd(), 0, offset, len) };
    if rv == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Returns the `f_type` magic of the filesystem holding `fd`.
pub(crate) fn fs_magic(fd: BorrowedFd<'_>) -> io::Result<i64> {
    let mut buf = MaybeUninit::<libc::statfs>::uninit();
    // SAFETY: `buf` is writable for one `statfs`, and fstatfs initializes it on success.
    let rv = unsafe { libc::fstatfs(fd.as_raw_fd(), buf.as_mut_ptr()) };
    if rv != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fstatfs returned 0, so `buf` is initialized.
    let stat = unsafe { buf.assume_init() };
    #[allow(clippy::unnecessary_cast)]
    let magic = stat.f_type as i64;
    Ok(magic)
}

/// Human-readable filesystem name for diagnostics.
pub(crate) fn fs_name(magic: i64) -> &'static str {
    match magic {
        TMPFS_MAGIC => "tmpfs",
        RAMFS_MAGIC => "ramfs",
        ZFS_MAGIC => "zfs",
        UBIFS_MAGIC => "ubifs",
        BTRFS_MAGIC => "btrfs",
        EXT4_MAGIC => "ext4",
        XFS_MAGIC => "xfs",
        OVERLAYFS_MAGIC => "overlayfs",
        _ => "unknown",
    }
}

/// Filesystems known to run kernel AIO synchronously in the submitting thread.
pub(crate) fn runs_aio_synchronously(magic: i64) -> bool {
    matches!(magic, TMPFS_MAGIC | RAMFS_MAGIC | ZFS_MAGIC | UBIFS_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iocb_matches_kernel_abi() {
        assert_eq!(std::mem::size_of::<Iocb>(), 64);
        assert_eq!(std::mem::size_of::<IoEvent>(), 32);
    }

    #[test]
    fn fs_magic_of_tempdir_is_readable() {
        use std::os::fd::AsFd;

        let file = tempfile::tempfile().unwrap();
        let magic = fs_magic(file.as_fd()).unwrap();
        assert_ne!(magic, 0);
    }
}
