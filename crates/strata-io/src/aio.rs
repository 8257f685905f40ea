//! Kernel asynchronous I/O (`io_setup` / `io_submit` / `io_getevents`).
//!
//! An [`AioContext`] owns the kernel queue and every buffer handed to it.
//! Operations are moved in by [`AioContext::submit`] and the buffers come back
//! inside [`AioCompletion`]s from [`AioContext::poll`], so the kernel can never
//! write into memory the caller has already freed.
//!
//! # Alignment
//!
//! Requests against files opened with `O_DIRECT` must use a buffer, length and
//! offset aligned to the block size reported by [`crate::probe`]. The context
//! does not check this; the kernel rejects misaligned requests with `EINVAL`,
//! either at submission or in the completion result.
//!
//! # Teardown
//!
//! Submitted requests cannot be cancelled. [`AioContext::destroy`] refuses to
//! tear down while requests are in flight and hands the context back inside
//! [`ContextBusy`]. Dropping a busy context logs an error and destroys the
//! kernel queue, which blocks until the outstanding requests finish.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use crate::sys::{self, AioContextId, IoEvent, Iocb};
use crate::{AlignedBuffer, EventCounter, IoError};

/// Direction of an [`AioOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioOpKind {
    Read,
    Write,
}

/// A single read or write request, owning its buffer until completion.
///
/// The op holds its own duplicate of the target descriptor, so the caller may
/// close the file at any time and the request still reaches the same inode.
#[derive(Debug)]
pub struct AioOp {
    kind: AioOpKind,
    fd: OwnedFd,
    offset: u64,
    buffer: AlignedBuffer,
    rw_flags: i32,
}

impl AioOp {
    /// Reads `buffer.len()` bytes at `offset` into `buffer`.
    pub fn read(
        fd: BorrowedFd<'_>,
        offset: u64,
        buffer: AlignedBuffer,
    ) -> Result<Self, IoError> {
        Self::new(AioOpKind::Read, fd, offset, buffer)
    }

    /// Writes all of `buffer` at `offset`.
    pub fn write(
        fd: BorrowedFd<'_>,
        offset: u64,
        buffer: AlignedBuffer,
    ) -> Result<Self, IoError> {
        Self::new(AioOpKind::Write, fd, offset, buffer)
    }

    fn new(
        kind: AioOpKind,
        fd: BorrowedFd<'_>,
        offset: u64,
        buffer: AlignedBuffer,
    ) -> Result<Self, IoError> {
        let fd = fd
            .try_clone_to_owned()
            .map_err(|e| IoError::handle("dup", e))?;
        Ok(Self {
            kind,
            fd,
            offset,
            buffer,
            rw_flags: 0,
        })
    }

    /// Completes only once the written data is durable (`RWF_DSYNC`).
    pub fn dsync(mut self) -> Self {
        self.rw_flags |= sys::RWF_DSYNC;
        self
    }

    /// Fails with `EAGAIN` instead of blocking in the kernel (`RWF_NOWAIT`).
    pub fn nowait(mut self) -> Self {
        self.rw_flags |= sys::RWF_NOWAIT;
        self
    }

    pub fn kind(&self) -> AioOpKind {
        self.kind
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Gives the buffer back, e.g. for an op the kernel did not accept.
    pub fn into_buffer(self) -> AlignedBuffer {
        self.buffer
    }
}

/// The outcome of one submitted [`AioOp`].
#[derive(Debug)]
pub struct AioCompletion {
    pub kind: AioOpKind,
    pub offset: u64,
    /// The buffer the operation owned; holds the data for reads.
    pub buffer: AlignedBuffer,
    /// Bytes transferred, or the error the kernel reported.
    pub result: io::Result<usize>,
}

/// A submitted request: the control block must stay at a fixed address until
/// the kernel has consumed it, and the buffer until the request completes.
#[derive(Debug)]
struct InFlight {
    iocb: Box<Iocb>,
    op: AioOp,
}

/// Returned by [`AioContext::destroy`] when requests are still in flight.
#[derive(Debug, thiserror::Error)]
#[error("aio context has {} operations in flight", .context.in_flight())]
pub struct ContextBusy {
    context: AioContext,
}

impl ContextBusy {
    pub fn in_flight(&self) -> usize {
        self.context.in_flight()
    }

    /// Recovers the context so its completions can be polled.
    pub fn into_context(self) -> AioContext {
        self.context
    }
}

/// An owned kernel AIO queue.
///
/// Not synchronized: one owner submits and polls. Destroyed exactly once,
/// either by [`AioContext::destroy`] or on drop.
#[derive(Debug)]
pub struct AioContext {
    id: Option<AioContextId>,
    capacity: usize,
    next_key: u64,
    in_flight: HashMap<u64, InFlight>,
    notifier: Option<EventCounter>,
}

impl AioContext {
    /// Reserves a kernel queue for up to `capacity` concurrent requests.
    pub fn new(capacity: u32) -> Result<Self, IoError> {
        let id = sys::io_setup(capacity).map_err(|e| IoError::handle("io_setup", e))?;
        tracing::debug!(capacity, "created aio context");
        Ok(Self {
            id: Some(id),
            capacity: capacity as usize,
            next_key: 0,
            in_flight: HashMap::new(),
            notifier: None,
        })
    }

    /// Routes completion notifications for subsequent submissions to `counter`.
    pub fn set_notifier(&mut self, counter: EventCounter) {
        self.notifier = Some(counter);
    }

    pub fn notifier(&self) -> Option<&EventCounter> {
        self.notifier.as_ref()
    }

    /// Mutable access, for registering the counter with a `mio::Poll`.
    pub fn notifier_mut(&mut self) -> Option<&mut EventCounter> {
        self.notifier.as_mut()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of submitted requests whose completion has not been polled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Submits `ops` in order.
    ///
    /// Returns the tail of `ops` the kernel did not accept (usually empty).
    /// On error nothing was accepted and the ops are dropped.
    pub fn submit(&mut self, ops: Vec<AioOp>) -> Result<Vec<AioOp>, IoError> {
        if ops.is_empty() {
            return Ok(ops);
        }
        if self.in_flight.len() + ops.len() > self.capacity {
            return Err(IoError::ContextFull {
                in_flight: self.in_flight.len(),
                requested: ops.len(),
                capacity: self.capacity,
            });
        }
        let id = self.live_id();

        let mut keys = Vec::with_capacity(ops.len());
        for mut op in ops {
            let key = self.next_key;
            self.next_key += 1;

            let mut iocb = Box::new(Iocb {
                aio_data: key,
                aio_rw_flags: op.rw_flags,
                aio_lio_opcode: match op.kind {
                    AioOpKind::Read => sys::IOCB_CMD_PREAD,
                    AioOpKind::Write => sys::IOCB_CMD_PWRITE,
                },
                aio_fildes: op.fd.as_raw_fd() as u32,
                aio_buf: op.buffer.as_mut_ptr() as u64,
                aio_nbytes: op.buffer.len() as u64,
                aio_offset: op.offset as i64,
                ..Iocb::default()
            });
            if let Some(counter) = &self.notifier {
                iocb.aio_flags |= sys::IOCB_FLAG_RESFD;
                iocb.aio_resfd = counter.as_raw_fd() as u32;
            }
            self.in_flight.insert(key, InFlight { iocb, op });
            keys.push(key);
        }

        let mut iocbs: Vec<*mut Iocb> = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(entry) = self.in_flight.get_mut(key) {
                iocbs.push(std::ptr::from_mut::<Iocb>(entry.iocb.as_mut()));
            }
        }

        // SAFETY: each control block and its buffer are owned by
        // `self.in_flight` and are only released after the kernel reports the
        // completion in `poll`, or after `io_destroy` in `Drop`.
        let submitted = match unsafe { sys::io_submit(id, &mut iocbs) } {
            Ok(n) => n,
            Err(e) => {
                for key in &keys {
                    self.in_flight.remove(key);
                }
                return Err(IoError::handle("io_submit", e));
            }
        };

        let rejected: Vec<AioOp> = keys[submitted..]
            .iter()
            .filter_map(|key| self.in_flight.remove(key))
            .map(|entry| entry.op)
            .collect();
        tracing::trace!(
            submitted,
            rejected = rejected.len(),
            in_flight = self.in_flight.len(),
            "aio submit"
        );
        Ok(rejected)
    }

    /// Waits up to `timeout` for at least `min_ready` and at most `max_ready`
    /// completions.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` only checks. Both
    /// bounds are clamped to the number of requests in flight. Interrupted
    /// waits are retried.
    pub fn poll(
        &mut self,
        min_ready: usize,
        max_ready: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<AioCompletion>, IoError> {
        let max_ready = max_ready.min(self.in_flight.len());
        if max_ready == 0 {
            return Ok(Vec::new());
        }
        let min_ready = min_ready.min(max_ready);
        let id = self.live_id();

        let mut events = vec![IoEvent::default(); max_ready];
        let n = loop {
            match sys::io_getevents(id, min_ready, &mut events, timeout) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(IoError::handle("io_getevents", e)),
            }
        };

        let mut completions = Vec::with_capacity(n);
        for event in &events[..n] {
            let Some(InFlight { op, .. }) = self.in_flight.remove(&event.data) else {
                tracing::error!(key = event.data, "completion for unknown aio request");
                continue;
            };
            let result = if event.res >= 0 {
                Ok(event.res as usize)
            } else {
                Err(io::Error::from_raw_os_error(-event.res as i32))
            };
            completions.push(AioCompletion {
                kind: op.kind,
                offset: op.offset,
                buffer: op.buffer,
                result,
            });
        }
        Ok(completions)
    }

    /// Destroys the kernel queue.
    ///
    /// Refuses while requests are in flight; poll their completions first.
    pub fn destroy(mut self) -> Result<(), ContextBusy> {
        if !self.in_flight.is_empty() {
            return Err(ContextBusy { context: self });
        }
        self.teardown();
        Ok(())
    }

    fn live_id(&self) -> AioContextId {
        // `id` is only taken by `teardown`, which runs on consumption or drop.
        self.id.unwrap_or_default()
    }

    fn teardown(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Err(e) = sys::io_destroy(id) {
            tracing::error!(error = %e, "io_destroy failed");
        } else {
            tracing::debug!("destroyed aio context");
        }
    }
}

impl Drop for AioContext {
    fn drop(&mut self) {
        if !self.in_flight.is_empty() {
            tracing::error!(
                in_flight = self.in_flight.len(),
                "dropping aio context with operations in flight; waiting for the kernel"
            );
        }
        // io_destroy blocks until outstanding requests finish, so the buffers
        // in `in_flight` are released only afterwards.
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::os::fd::AsFd;

    use super::*;

    /// Kernel AIO may be disabled (seccomp, exhausted aio-max-nr).
    fn context(capacity: u32) -> Option<AioContext> {
        match AioContext::new(capacity) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                eprintln!("skipping: kernel aio unavailable: {e}");
                None
            }
        }
    }

    fn scratch_file(dir: &tempfile::TempDir) -> std::fs::File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.path().join("aio.dat"))
            .unwrap()
    }

    #[test]
    fn write_then_read_round_trip() {
        let Some(mut ctx) = context(4) else { return };
        let tmp = tempfile::tempdir().unwrap();
        let file = scratch_file(&tmp);

        let payload = AlignedBuffer::from_data(b"segment entry", 4096);
        let rejected = ctx
            .submit(vec![AioOp::write(file.as_fd(), 0, payload).unwrap()])
            .unwrap();
        assert!(rejected.is_empty());
        assert_eq!(ctx.in_flight(), 1);

        let done = ctx.poll(1, 1, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].kind, AioOpKind::Write);
        assert_eq!(*done[0].result.as_ref().unwrap(), 4096);
        assert_eq!(ctx.in_flight(), 0);

        let buf = AlignedBuffer::zeroed(4096, 4096);
        ctx.submit(vec![AioOp::read(file.as_fd(), 0, buf).unwrap()]).unwrap();
        let mut done = ctx.poll(1, 1, Some(Duration::from_secs(5))).unwrap();
        let read = done.pop().unwrap();
        assert_eq!(*read.result.as_ref().unwrap(), 4096);
        assert_eq!(&read.buffer.as_slice()[..13], b"segment entry");

        ctx.destroy().unwrap();
    }

    #[test]
    fn destroy_refused_while_in_flight() {
        let Some(mut ctx) = context(1) else { return };
        let tmp = tempfile::tempdir().unwrap();
        let file = scratch_file(&tmp);

        let op = AioOp::write(file.as_fd(), 0, AlignedBuffer::zeroed(512, 512)).unwrap();
        ctx.submit(vec![op]).unwrap();

        let busy = ctx.destroy().unwrap_err();
        assert_eq!(busy.in_flight(), 1);
        assert_eq!(busy.to_string(), "aio context has 1 operations in flight");

        let mut ctx = busy.into_context();
        let done = ctx.poll(1, 1, None).unwrap();
        assert_eq!(done.len(), 1);
        ctx.destroy().unwrap();
    }

    #[test]
    fn submit_beyond_capacity_is_rejected() {
        let Some(mut ctx) = context(1) else { return };
        let tmp = tempfile::tempdir().unwrap();
        let file = scratch_file(&tmp);

        let ops = vec![
            AioOp::write(file.as_fd(), 0, AlignedBuffer::zeroed(512, 512)).unwrap(),
            AioOp::write(file.as_fd(), 512, AlignedBuffer::zeroed(512, 512)).unwrap(),
        ];
        let err = ctx.submit(ops).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
        assert_eq!(ctx.in_flight(), 0);
    }

    #[test]
    fn op_keeps_its_file_after_the_caller_closes_it() {
        let Some(mut ctx) = context(1) else { return };
        let tmp = tempfile::tempdir().unwrap();
        let segment = tmp.path().join("segment-a");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&segment)
            .unwrap();

        let payload = AlignedBuffer::from_data(b"LOG-ENTRY", 512);
        let op = AioOp::write(file.as_fd(), 0, payload).unwrap();
        drop(file);

        // Reuses the descriptor number the segment was opened on.
        let unrelated_path = tmp.path().join("unrelated");
        let unrelated = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&unrelated_path)
            .unwrap();

        ctx.submit(vec![op]).unwrap();
        let done = ctx.poll(1, 1, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(*done[0].result.as_ref().unwrap(), 512);

        assert!(std::fs::read(&segment).unwrap().starts_with(b"LOG-ENTRY"));
        assert_eq!(unrelated.metadata().unwrap().len(), 0);
        ctx.destroy().unwrap();
    }

    #[test]
    fn zero_timeout_poll_does_not_block() {
        let Some(mut ctx) = context(1) else { return };
        assert!(ctx.poll(0, 1, Some(Duration::ZERO)).unwrap().is_empty());
    }

    #[test]
    fn completions_signal_the_event_counter() {
        let Some(mut ctx) = context(2) else { return };
        ctx.set_notifier(EventCounter::new().unwrap());
        let tmp = tempfile::tempdir().unwrap();
        let file = scratch_file(&tmp);

        ctx.submit(vec![
            AioOp::write(file.as_fd(), 0, AlignedBuffer::zeroed(512, 512)).unwrap(),
            AioOp::write(file.as_fd(), 512, AlignedBuffer::zeroed(512, 512)).unwrap(),
        ])
        .unwrap();

        let done = ctx.poll(2, 2, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(done.len(), 2);
        assert_eq!(ctx.notifier().unwrap().drain().unwrap(), 2);
    }
}
