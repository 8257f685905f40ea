//! File lifecycle operations, scoped to a [`StorageDir`].
//!
//! Every operation that adds, renames or removes a directory entry syncs the
//! directory before returning, so a successful return means the change
//! survives a crash. Content is synced before the name that exposes it.
//!
//! # Crash atomicity of `make_file`
//!
//! New files are staged under a temporary name, written, synced, and only
//! then hard-linked to their final name. A crash at any point leaves the final
//! name either absent or pointing at the complete content; at worst a stale
//! `.tmp-*` file remains.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::ErrorKind;

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::dir::sync_dir;
use crate::path::{FileName, StorageDir};
use crate::transfer::write_fully;
use crate::IoError;

/// Prefix of staging files created by [`StorageDir::make_file`].
pub const TEMP_PREFIX: &str = ".tmp-";

/// Length of the random suffix appended by [`StorageDir::make_temp_file`].
const TEMP_SUFFIX_LEN: usize = 6;

/// Attempts at finding an unused temporary name before giving up.
const TEMP_ATTEMPTS: usize = 16;

/// Flags for opening files.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create the file if it doesn't exist.
    pub create: bool,
    /// Create the file, failing if it already exists.
    pub create_new: bool,
    /// Open in append mode.
    pub append: bool,
    /// Truncate to zero length on open.
    pub truncate: bool,
    /// Use Direct I/O (`O_DIRECT` on Linux, ignored elsewhere).
    pub direct: bool,
}

impl OpenFlags {
    /// Flags for reading an existing file.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Flags for reading and overwriting an existing file in place.
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    /// Flags for exclusively creating a new file.
    pub fn create_new() -> Self {
        Self {
            read: true,
            write: true,
            create_new: true,
            ..Self::default()
        }
    }

    /// Same flags, with Direct I/O.
    pub fn direct(self) -> Self {
        Self {
            direct: true,
            ..self
        }
    }

    fn to_options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        opts.read(self.read)
            .write(self.write)
            .create(self.create)
            .create_new(self.create_new)
            .append(self.append)
            .truncate(self.truncate);

        #[cfg(target_os = "linux")]
        if self.direct {
            use std::os::unix::fs::OpenOptionsExt;
            opts.custom_flags(libc::O_DIRECT);
        }

        opts
    }
}

impl StorageDir {
    /// Opens `name` with `flags`.
    pub fn open_file(&self, name: &FileName, flags: OpenFlags) -> Result<File, IoError> {
        let path = self.join(name);
        flags
            .to_options()
            .open(&path)
            .map_err(|e| IoError::os("open", path, e))
    }

    /// Returns the metadata of `name`.
    pub fn stat_file(&self, name: &FileName) -> Result<Metadata, IoError> {
        let path = self.join(name);
        fs::metadata(&path).map_err(|e| IoError::os("stat", path, e))
    }

    /// Returns true if `name` has zero length.
    pub fn is_empty_file(&self, name: &FileName) -> Result<bool, IoError> {
        Ok(self.stat_file(name)?.len() == 0)
    }

    /// Exclusively creates `<prefix>XXXXXX` with a random suffix.
    pub fn make_temp_file(&self, prefix: &str) -> Result<(FileName, File), IoError> {
        let mut rng = rand::thread_rng();
        for _ in 0..TEMP_ATTEMPTS {
            let suffix: String = (&mut rng)
                .sample_iter(Alphanumeric)
                .take(TEMP_SUFFIX_LEN)
                .map(char::from)
                .collect();
            let name = FileName::new(format!("{prefix}{suffix}"))?;
            match self.open_file(&name, OpenFlags::create_new()) {
                Ok(file) => return Ok((name, file)),
                Err(e) if e.kind() == crate::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }
        Err(IoError::os(
            "create temporary file",
            self.path().join(format!("{prefix}{}", "X".repeat(TEMP_SUFFIX_LEN))),
            ErrorKind::AlreadyExists.into(),
        ))
    }

    /// Creates `name` holding the concatenation of `bufs`, durably.
    ///
    /// Fails with [`crate::ErrorKind::AlreadyExists`] if `name` exists. On
    /// failure `name` is left absent.
    pub fn make_file<B: AsRef<[u8]>>(&self, name: &FileName, bufs: &[B]) -> Result<(), IoError> {
        self.make_file_with(name, bufs, |file, buf| write_fully(file, buf))
    }

    /// [`StorageDir::make_file`] with each buffer handed to `write`.
    pub(crate) fn make_file_with<B, W>(
        &self,
        name: &FileName,
        bufs: &[B],
        mut write: W,
    ) -> Result<(), IoError>
    where
        B: AsRef<[u8]>,
        W: FnMut(&mut File, &[u8]) -> Result<(), IoError>,
    {
        let target = self.join(name);
        match fs::symlink_metadata(&target) {
            Ok(_) => {
                return Err(IoError::os(
                    "create",
                    target,
                    ErrorKind::AlreadyExists.into(),
                ));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(IoError::os("stat", target, e)),
        }

        let (staging, mut file) = self.make_temp_file(TEMP_PREFIX)?;
        let staging_path = self.join(&staging);

        let result = (|| {
            for buf in bufs {
                write(&mut file, buf.as_ref())?;
            }
            file.sync_all()
                .map_err(|e| IoError::os("fsync", &staging_path, e))?;
            fs::hard_link(&staging_path, &target).map_err(|e| IoError::os("link", &target, e))
        })();

        drop(file);
        self.try_unlink_file(&staging);
        result?;

        sync_dir(self.path())?;
        tracing::debug!(path = %target.display(), "created file");
        Ok(())
    }

    /// Atomically renames `from` to `to`, replacing `to` if it exists.
    pub fn rename_file(&self, from: &FileName, to: &FileName) -> Result<(), IoError> {
        let from_path = self.join(from);
        let to_path = self.join(to);
        fs::rename(&from_path, &to_path).map_err(|e| IoError::os("rename", from_path, e))?;
        sync_dir(self.path())?;
        tracing::debug!(dir = %self.path().display(), %from, %to, "renamed file");
        Ok(())
    }

    /// Sets the length of `name` to `len` and syncs it.
    pub fn truncate_file(&self, name: &FileName, len: u64) -> Result<(), IoError> {
        let path = self.join(name);
        let file = self.open_file(name, OpenFlags::read_write())?;
        file.set_len(len)
            .map_err(|e| IoError::os("truncate", &path, e))?;
        file.sync_all().map_err(|e| IoError::os("fsync", &path, e))?;
        tracing::debug!(path = %path.display(), len, "truncated file");
        Ok(())
    }

    /// Removes `name` and syncs the directory.
    pub fn unlink_file(&self, name: &FileName) -> Result<(), IoError> {
        let path = self.join(name);
        fs::remove_file(&path).map_err(|e| IoError::os("unlink", &path, e))?;
        sync_dir(self.path())?;
        tracing::debug!(path = %path.display(), "removed file");
        Ok(())
    }

    /// Best-effort [`StorageDir::unlink_file`] for cleanup paths.
    ///
    /// Never fails: a cleanup error must not replace the error being handled.
    pub fn try_unlink_file(&self, name: &FileName) {
        if let Err(e) = self.unlink_file(name) {
            tracing::warn!(
                path = %self.join(name).display(),
                error = %e,
                "ignoring cleanup failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::ErrorKind as Kind;

    fn setup() -> (tempfile::TempDir, StorageDir) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StorageDir::new(tmp.path()).unwrap();
        (tmp, dir)
    }

    fn name(s: &str) -> FileName {
        FileName::new(s).unwrap()
    }

    fn entries(dir: &StorageDir) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn make_file_writes_all_buffers_in_order() {
        let (_tmp, dir) = setup();
        let bufs: [&[u8]; 3] = [b"open-", b"segment-", b"0001"];
        dir.make_file(&name("metadata1"), &bufs).unwrap();

        let mut content = String::new();
        dir.open_file(&name("metadata1"), OpenFlags::read_only())
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "open-segment-0001");
        assert_eq!(entries(&dir), vec!["metadata1"]);
    }

    #[test]
    fn make_file_refuses_existing_name_and_keeps_it() {
        let (_tmp, dir) = setup();
        dir.make_file(&name("metadata1"), &[b"first"]).unwrap();

        let err = dir.make_file(&name("metadata1"), &[b"second"]).unwrap_err();
        assert_eq!(err.kind(), Kind::AlreadyExists);
        assert_eq!(fs::read(dir.join(&name("metadata1"))).unwrap(), b"first");
        assert_eq!(entries(&dir), vec!["metadata1"]);
    }

    #[test]
    fn make_file_with_no_buffers_creates_empty_file() {
        let (_tmp, dir) = setup();
        dir.make_file::<&[u8]>(&name("empty"), &[]).unwrap();
        assert!(dir.is_empty_file(&name("empty")).unwrap());
    }

    #[test]
    fn rename_replaces_target() {
        let (_tmp, dir) = setup();
        dir.make_file(&name("open-1"), &[b"entries"]).unwrap();
        dir.make_file(&name("1-10"), &[b"stale"]).unwrap();

        dir.rename_file(&name("open-1"), &name("1-10")).unwrap();
        assert_eq!(entries(&dir), vec!["1-10"]);
        assert_eq!(fs::read(dir.join(&name("1-10"))).unwrap(), b"entries");
    }

    #[test]
    fn rename_missing_source_is_not_found() {
        let (_tmp, dir) = setup();
        let err = dir.rename_file(&name("nope"), &name("x")).unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
        assert!(err.to_string().starts_with("rename "));
    }

    #[test]
    fn truncate_shrinks_file() {
        let (_tmp, dir) = setup();
        dir.make_file(&name("seg"), &[b"0123456789"]).unwrap();
        dir.truncate_file(&name("seg"), 4).unwrap();
        assert_eq!(dir.stat_file(&name("seg")).unwrap().len(), 4);
    }

    #[test]
    fn unlink_reports_missing_file() {
        let (_tmp, dir) = setup();
        let err = dir.unlink_file(&name("gone")).unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
    }

    #[test]
    fn try_unlink_never_fails() {
        let (_tmp, dir) = setup();
        dir.try_unlink_file(&name("gone"));

        // A directory cannot be unlinked as a file.
        fs::create_dir(dir.join(&name("subdir"))).unwrap();
        dir.try_unlink_file(&name("subdir"));
        assert!(dir.join(&name("subdir")).is_dir());
    }

    #[test]
    fn stat_and_open_missing_file_are_not_found() {
        let (_tmp, dir) = setup();
        assert_eq!(dir.stat_file(&name("x")).unwrap_err().kind(), Kind::NotFound);
        assert_eq!(
            dir.open_file(&name("x"), OpenFlags::read_only())
                .unwrap_err()
                .kind(),
            Kind::NotFound
        );
    }

    #[test]
    fn temp_files_get_distinct_names() {
        let (_tmp, dir) = setup();
        let (a, _fa) = dir.make_temp_file(".probe-").unwrap();
        let (b, _fb) = dir.make_temp_file(".probe-").unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(".probe-"));
        assert_eq!(a.as_str().len(), ".probe-".len() + TEMP_SUFFIX_LEN);
    }

    #[test]
    fn is_empty_file_distinguishes_sizes() {
        let (_tmp, dir) = setup();
        dir.make_file(&name("a"), &[b""]).unwrap();
        dir.make_file(&name("b"), &[b"x"]).unwrap();
        assert!(dir.is_empty_file(&name("a")).unwrap());
        assert!(!dir.is_empty_file(&name("b")).unwrap());
    }

    #[test]
    fn failed_cleanup_is_logged_as_warning() {
        let (_tmp, dir) = setup();
        let logs = crate::tests::capture_logs(|| dir.try_unlink_file(&name("never-created")));
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("ignoring cleanup failure"), "{logs}");
        assert!(logs.contains("never-created"), "{logs}");
    }

    #[test]
    fn make_file_write_failure_leaves_nothing_behind() {
        let (_tmp, dir) = setup();
        let bufs: [&[u8]; 3] = [b"term=", b"3", b"vote=2"];

        let mut calls = 0;
        let err = dir
            .make_file_with(&name("metadata2"), &bufs, |file, buf| {
                calls += 1;
                if calls == 2 {
                    return Err(IoError::handle(
                        "write",
                        std::io::Error::new(ErrorKind::StorageFull, "no space left on device"),
                    ));
                }
                write_fully(file, buf)
            })
            .unwrap_err();

        assert_eq!(err.kind(), Kind::Io);
        assert_eq!(calls, 2);
        assert_eq!(
            dir.stat_file(&name("metadata2")).unwrap_err().kind(),
            Kind::NotFound
        );
        assert!(entries(&dir).is_empty(), "{:?}", entries(&dir));

        // The name is still free for a later attempt.
        dir.make_file(&name("metadata2"), &bufs).unwrap();
        assert_eq!(entries(&dir), vec!["metadata2"]);
    }

    const KILL_DIR_ENV: &str = "STRATA_IO_MAKE_FILE_KILL_DIR";
    const KILL_PAYLOAD_LEN: usize = 256 * 1024;

    fn kill_payload(i: usize) -> Vec<u8> {
        (0..KILL_PAYLOAD_LEN)
            .map(|j| u8::try_from((i * 31 + j) % 251).unwrap())
            .collect()
    }

    /// Runs in a child process: writes metadata files until it is killed.
    #[test]
    #[ignore = "spawned by killed_writer_leaves_only_complete_files"]
    fn write_files_until_killed() {
        let Some(path) = std::env::var_os(KILL_DIR_ENV) else {
            return;
        };
        let dir = StorageDir::new(path).unwrap();
        for i in 0.. {
            dir.make_file(&name(&format!("meta-{i}")), &[kill_payload(i)])
                .unwrap();
        }
    }

    #[test]
    fn killed_writer_leaves_only_complete_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut child = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "file::tests::write_files_until_killed",
                "--ignored",
                "--test-threads=1",
            ])
            .env(KILL_DIR_ENV, tmp.path())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(20);
        loop {
            let done = fs::read_dir(tmp.path())
                .unwrap()
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("meta-"))
                .count();
            if done >= 3 || std::time::Instant::now() > deadline {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        child.kill().unwrap();
        child.wait().unwrap();

        let dir = StorageDir::new(tmp.path()).unwrap();
        let names = entries(&dir);
        assert!(names.iter().any(|n| n.starts_with("meta-")), "{names:?}");
        for entry in names {
            if entry.starts_with(TEMP_PREFIX) {
                continue;
            }
            let i: usize = entry
                .strip_prefix("meta-")
                .and_then(|n| n.parse().ok())
                .unwrap_or_else(|| panic!("unexpected entry {entry:?}"));
            let content = fs::read(dir.path().join(&entry)).unwrap();
            assert!(content == kill_payload(i), "{entry} is incomplete");
        }
    }
}
