//! File-backed export mutex
//!
//! One sentinel file per staging root, locked with `flock(2)` (`LockFileEx` on
//! Windows). Exclusive mode
//! admits a single export per requester; shared mode lets exports for the same
//! requester run side by side while still excluding an exclusive holder.
//!
//! Both lock flavors belong to the open file handle, so two opens of the
//! sentinel inside one process contend exactly like two processes do. The lock
//! is released when the guard is dropped, on every exit path.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Base interval between acquisition attempts
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Maximum random jitter added to each poll interval (milliseconds)
const POLL_JITTER_MS: u64 = 25;

/// Lock flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// At most one holder
    Exclusive,
    /// Any number of shared holders, no exclusive holder
    Shared,
}

impl LockMode {
    /// Exclusive unless concurrent exports are allowed
    pub fn for_concurrency(allow_concurrent: bool) -> Self {
        if allow_concurrent {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        }
    }
}

/// RAII guard for a held export lock
#[derive(Debug)]
pub struct ExportLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl ExportLock {
    /// Acquire the lock at `path`, polling with jitter until `timeout` elapses
    ///
    /// The sentinel and its parent directory are created if absent. On timeout
    /// returns [`Error::ConcurrentExport`].
    pub async fn acquire(path: &Path, mode: LockMode, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let start = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path, mode)? {
                tracing::debug!(
                    path = %path.display(),
                    mode = ?mode,
                    waited_ms = start.elapsed().as_millis() as u64,
                    "acquired export lock"
                );
                return Ok(lock);
            }

            let waited = start.elapsed();
            if waited >= timeout {
                tracing::warn!(
                    path = %path.display(),
                    waited_ms = waited.as_millis() as u64,
                    "export lock acquisition timed out"
                );
                return Err(Error::ConcurrentExport {
                    staging_root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                    waited,
                });
            }

            let jitter = Duration::from_millis(rand::random::<u64>() % (POLL_JITTER_MS + 1));
            let remaining = timeout.saturating_sub(waited);
            tokio::time::sleep((POLL_INTERVAL + jitter).min(remaining)).await;
        }
    }

    /// Attempt the lock once without blocking
    ///
    /// Returns `Ok(None)` when another holder conflicts.
    pub fn try_acquire(path: &Path, mode: LockMode) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        if try_flock(&file, mode)? {
            Ok(Some(Self {
                file,
                path: path.to_path_buf(),
                mode,
            }))
        } else {
            Ok(None)
        }
    }

    /// Path of the sentinel file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the lock is held in
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for ExportLock {
    fn drop(&mut self) {
        if let Err(e) = unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release export lock");
        } else {
            tracing::debug!(path = %self.path.display(), "released export lock");
        }
    }
}

#[cfg(unix)]
fn try_flock(file: &File, mode: LockMode) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::Exclusive => libc::LOCK_EX,
        LockMode::Shared => libc::LOCK_SH,
    };
    // SAFETY: flock is a standard POSIX call on a descriptor owned by `file`.
    let result = unsafe { libc::flock(file.as_raw_fd(), op | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: see try_flock.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
fn try_flock(file: &File, mode: LockMode) -> io::Result<bool> {
    use std::os::windows::io::AsRawHandle;
    use winapi::shared::winerror::ERROR_LOCK_VIOLATION;
    use winapi::um::fileapi::LockFileEx;
    use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};

    let flags = match mode {
        LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
        LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    };
    // SAFETY: OVERLAPPED is plain data; the handle is owned by `file` and the
    // whole byte range is locked.
    let result = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        LockFileEx(
            file.as_raw_handle() as _,
            flags,
            0,
            u32::MAX,
            u32::MAX,
            &mut overlapped,
        )
    };
    if result != 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
        return Ok(false);
    }
    Err(err)
}

#[cfg(windows)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::UnlockFileEx;
    use winapi::um::minwinbase::OVERLAPPED;

    // SAFETY: see try_flock.
    let result = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        UnlockFileEx(
            file.as_raw_handle() as _,
            0,
            u32::MAX,
            u32::MAX,
            &mut overlapped,
        )
    };
    if result != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(unix, windows)))]
compile_error!("export locks need flock(2) or LockFileEx on this target");

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn acquire_creates_sentinel_and_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export/u1/.lock");

        let lock = ExportLock::acquire(&path, LockMode::Exclusive, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(lock.path(), path);
        assert_eq!(lock.mode(), LockMode::Exclusive);
    }

    #[tokio::test]
    async fn exclusive_lock_blocks_second_holder_until_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let _held = ExportLock::acquire(&path, LockMode::Exclusive, Duration::from_secs(1))
            .await
            .unwrap();

        let start = Instant::now();
        let err = ExportLock::acquire(&path, LockMode::Exclusive, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(start.elapsed() >= Duration::from_millis(200));
        match err {
            Error::ConcurrentExport {
                staging_root,
                waited,
            } => {
                assert_eq!(staging_root, dir.path());
                assert!(waited >= Duration::from_millis(200));
            }
            other => panic!("expected ConcurrentExport, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_guard_releases_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");

        let held = ExportLock::try_acquire(&path, LockMode::Exclusive)
            .unwrap()
            .unwrap();
        assert!(
            ExportLock::try_acquire(&path, LockMode::Exclusive)
                .unwrap()
                .is_none()
        );

        drop(held);
        assert!(
            ExportLock::try_acquire(&path, LockMode::Exclusive)
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn waiter_acquires_after_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");
        let held = ExportLock::acquire(&path, LockMode::Exclusive, Duration::from_secs(1))
            .await
            .unwrap();

        let waiter = {
            let path = path.clone();
            tokio::spawn(async move {
                ExportLock::acquire(&path, LockMode::Exclusive, Duration::from_secs(5)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shared_locks_coexist_but_exclude_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".lock");

        let a = ExportLock::try_acquire(&path, LockMode::Shared).unwrap();
        let b = ExportLock::try_acquire(&path, LockMode::Shared).unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(
            ExportLock::try_acquire(&path, LockMode::Exclusive)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn concurrency_flag_selects_mode() {
        assert_eq!(LockMode::for_concurrency(false), LockMode::Exclusive);
        assert_eq!(LockMode::for_concurrency(true), LockMode::Shared);
    }
}
