//! End-to-end tests across the segment lifecycle.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use crate::{
    ErrorKind, FileName, IoMode, IoPreference, OpenFlags, StorageDir, is_at_eof,
    is_filled_with_trailing_zeros, preallocate, probe_or_conservative, read_fully, write_fully,
};

fn name(s: &str) -> FileName {
    FileName::new(s).unwrap()
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` and returns what it logged at warn level or above.
pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn segment_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = StorageDir::ensure(tmp.path().join("data")).unwrap();

    // Metadata files are written atomically.
    dir.make_file(&name("metadata1"), &[b"term=1".as_slice()])
        .unwrap();
    let err = dir
        .make_file(&name("metadata1"), &[b"term=2".as_slice()])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    // An open segment is pre-allocated, then partially filled.
    let open = name("open-1");
    let mut file = dir.open_file(&open, OpenFlags::create_new()).unwrap();
    if let Err(e) = preallocate(&file, 0, 64 * 1024) {
        assert_eq!(e.kind(), ErrorKind::Unsupported);
        file.set_len(64 * 1024).unwrap();
    }
    write_fully(&mut file, b"entry-1entry-2").unwrap();
    file.sync_all().unwrap();

    // Recovery: everything past the last entry is still zero.
    let mut file = dir.open_file(&open, OpenFlags::read_only()).unwrap();
    let mut entries = [0u8; 14];
    read_fully(&mut file, &mut entries).unwrap();
    assert_eq!(&entries, b"entry-1entry-2");
    assert!(is_filled_with_trailing_zeros(&mut file).unwrap());
    assert_eq!(file.stream_position().unwrap(), 14);
    assert!(!is_at_eof(&mut file));

    // Closing the segment: trim the tail, then give it its final name.
    dir.truncate_file(&open, 14).unwrap();
    let closed = name("0000000000000001-0000000000000002");
    dir.rename_file(&open, &closed).unwrap();
    assert_eq!(dir.stat_file(&closed).unwrap().len(), 14);
    assert_eq!(
        dir.stat_file(&open).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let mut file = dir.open_file(&closed, OpenFlags::read_only()).unwrap();
    file.seek(SeekFrom::End(0)).unwrap();
    assert!(is_at_eof(&mut file));

    dir.unlink_file(&closed).unwrap();
    dir.unlink_file(&name("metadata1")).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn torn_tail_is_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = StorageDir::ensure(tmp.path()).unwrap();
    let seg = name("open-2");

    let mut file = dir.open_file(&seg, OpenFlags::create_new()).unwrap();
    write_fully(&mut file, &[0u8; 8192]).unwrap();
    write_fully(&mut file, &[0xAB]).unwrap();

    let mut file = dir.open_file(&seg, OpenFlags::read_only()).unwrap();
    assert!(!is_filled_with_trailing_zeros(&mut file).unwrap());

    // A reader that stops early sees a short read, not silent truncation.
    let mut buf = vec![0u8; 9000];
    let mut file = dir.open_file(&seg, OpenFlags::read_only()).unwrap();
    let err = read_fully(&mut file, &mut buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn probed_capabilities_always_yield_a_mode() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = StorageDir::ensure(tmp.path()).unwrap();

    let outcome = probe_or_conservative(&dir);
    let mode = IoMode::select(outcome.capabilities, IoPreference::Auto).unwrap();
    assert_eq!(
        mode.block_size().unwrap_or(0),
        outcome.capabilities.direct_io_block_size
    );
    assert_eq!(
        IoMode::select(outcome.capabilities, IoPreference::Buffered).unwrap(),
        IoMode::Buffered
    );

    let mut leftovers = std::fs::read_dir(dir.path()).unwrap();
    assert!(leftovers.next().is_none());
}

#[cfg(target_os = "linux")]
#[test]
fn direct_aio_write_with_probed_alignment() {
    use std::os::fd::AsFd;
    use std::time::Duration;

    use crate::{AioContext, AioOp, AlignedBuffer, EventCounter};

    let tmp = tempfile::tempdir().unwrap();
    let dir = StorageDir::ensure(tmp.path()).unwrap();
    let caps = probe_or_conservative(&dir).capabilities;
    let IoMode::Async { block_size } = IoMode::select(caps, IoPreference::Auto).unwrap() else {
        eprintln!("skipping: no asynchronous direct io on {}", tmp.path().display());
        return;
    };

    let seg = name("open-3");
    let file = dir
        .open_file(&seg, OpenFlags::create_new().direct())
        .unwrap();
    let Ok(mut ctx) = AioContext::new(4) else {
        eprintln!("skipping: kernel aio unavailable");
        return;
    };
    ctx.set_notifier(EventCounter::new().unwrap());

    let mut block = AlignedBuffer::zeroed(block_size, block_size);
    block.as_mut_slice()[..5].copy_from_slice(b"entry");
    let rejected = ctx
        .submit(vec![AioOp::write(file.as_fd(), 0, block).unwrap().dsync()])
        .unwrap();
    assert!(rejected.is_empty());

    let done = ctx.poll(1, 1, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(*done[0].result.as_ref().unwrap(), block_size);
    assert_eq!(ctx.notifier().unwrap().drain().unwrap(), 1);
    ctx.destroy().unwrap();

    let mut check = dir.open_file(&seg, OpenFlags::read_only()).unwrap();
    let mut head = [0u8; 5];
    check.read_exact(&mut head).unwrap();
    assert_eq!(&head, b"entry");
}
