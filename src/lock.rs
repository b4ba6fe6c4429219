/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::lock
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Cross-process mutual exclusion for operations that touch
    an installation's package directory.

  Security / Safety Notes:
    Lock files live in the system temp directory and only hold
    the owning process id for diagnostics. On Unix ownership is
    an advisory `flock`, which the kernel drops when the owner
    exits, so a crashed holder never wedges the installation.

  Dependencies:
    sha1 for the lock key, libc for `flock` on Unix, tokio for
    polling and blocking offload.

  Operational Scope:
    Taken by the update manager around download, apply, install
    checks, and package directory resets.

  Revision History:
    2025-11-17 COD  Introduced installation lock.
    2025-12-09 COD  Switched Unix ownership to flock; moved file
                    work off the async workers.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Guard drop is the only release path
    - Bounded wait with explicit failure
============================================================*/

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::time::sleep;

use crate::error::{Result, SynupdError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Provider of the per-installation update lock.
#[async_trait]
pub trait UpdateLock: Send + Sync {
    /// Wait for the lock, failing with `UpdateInProgress` once the provider's
    /// timeout elapses.
    async fn acquire(&self) -> Result<UpdateLockGuard>;
}

#[derive(Debug)]
struct HeldLock {
    path: PathBuf,
    file: File,
}

/// Held lock; dropping it releases the lock.
#[derive(Debug)]
pub struct UpdateLockGuard {
    held: Option<HeldLock>,
}

impl UpdateLockGuard {
    pub fn path(&self) -> Option<&Path> {
        self.held.as_ref().map(|held| held.path.as_path())
    }
}

impl Drop for UpdateLockGuard {
    fn drop(&mut self) {
        if let Some(held) = self.held.take() {
            release(held);
        }
    }
}

/// Lock file named after the SHA-1 of the installation root.
#[derive(Debug, Clone)]
pub struct FileUpdateLock {
    root: PathBuf,
    lock_path: PathBuf,
    timeout: Duration,
}

impl FileUpdateLock {
    /// Lock for `root`, stored in the system temp directory.
    pub fn for_root(root: &Path, timeout: Duration) -> Self {
        Self::in_directory(&std::env::temp_dir(), root, timeout)
    }

    pub fn in_directory(lock_dir: &Path, root: &Path, timeout: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            lock_path: lock_dir.join(format!(".synupd-{}.lock", lock_key(root))),
            timeout,
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    async fn try_acquire_blocking(&self) -> Result<Option<UpdateLockGuard>> {
        let path = self.lock_path.clone();
        let held = tokio::task::spawn_blocking(move || try_hold(&path))
            .await
            .map_err(|err| SynupdError::Runtime(format!("Lock task failed: {err}")))??;
        Ok(held.map(|held| UpdateLockGuard { held: Some(held) }))
    }
}

#[async_trait]
impl UpdateLock for FileUpdateLock {
    async fn acquire(&self) -> Result<UpdateLockGuard> {
        if let Some(parent) = self.lock_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                SynupdError::Filesystem(format!(
                    "Failed to create lock directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let started = Instant::now();
        loop {
            if let Some(guard) = self.try_acquire_blocking().await? {
                return Ok(guard);
            }
            if started.elapsed() >= self.timeout {
                return Err(SynupdError::UpdateInProgress {
                    root: self.root.display().to_string(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

/// Lock that always succeeds immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUpdateLock;

#[async_trait]
impl UpdateLock for NoopUpdateLock {
    async fn acquire(&self) -> Result<UpdateLockGuard> {
        Ok(UpdateLockGuard { held: None })
    }
}

/// Hex SHA-1 of the root path's text.
pub fn lock_key(root: &Path) -> String {
    let mut hasher = Sha1::new();
    hasher.update(root.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn lock_error(path: &Path, err: std::io::Error) -> SynupdError {
    SynupdError::Filesystem(format!(
        "Failed to lock update lock {}: {err}",
        path.display()
    ))
}

fn record_owner(file: &mut File) {
    if file.set_len(0).is_ok() {
        let _ = file.write_all(std::process::id().to_string().as_bytes());
        let _ = file.flush();
    }
}

/// Open the lock file and take an exclusive non-blocking `flock`. The file
/// itself is never removed; ownership lives only in the kernel lock.
#[cfg(unix)]
fn try_hold(path: &Path) -> Result<Option<HeldLock>> {
    use std::os::unix::io::AsRawFd;

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|err| lock_error(path, err))?;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(None);
        }
        return Err(lock_error(path, err));
    }

    record_owner(&mut file);
    Ok(Some(HeldLock {
        path: path.to_path_buf(),
        file,
    }))
}

#[cfg(unix)]
fn release(held: HeldLock) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `held.file` until it drops below.
    unsafe {
        libc::flock(held.file.as_raw_fd(), libc::LOCK_UN);
    }
}

/// Exclusive creation of the lock file; its presence is ownership.
#[cfg(not(unix))]
fn try_hold(path: &Path) -> Result<Option<HeldLock>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            record_owner(&mut file);
            Ok(Some(HeldLock {
                path: path.to_path_buf(),
                file,
            }))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(lock_error(path, err)),
    }
}

#[cfg(not(unix))]
fn release(held: HeldLock) {
    drop(held.file);
    let _ = std::fs::remove_file(&held.path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_per_root() {
        let a = lock_key(Path::new("/opt/app"));
        assert_eq!(a, lock_key(Path::new("/opt/app")));
        assert_ne!(a, lock_key(Path::new("/opt/other")));
        assert_eq!(a.len(), 40);
    }

    #[tokio::test]
    async fn second_holder_times_out_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = FileUpdateLock::in_directory(
            dir.path(),
            Path::new("/opt/app"),
            Duration::from_millis(100),
        );

        let guard = lock.acquire().await.expect("first acquire");
        assert_eq!(guard.path(), Some(lock.lock_path()));
        assert!(lock.lock_path().exists());

        let contended = lock.acquire().await;
        assert!(matches!(contended, Err(SynupdError::UpdateInProgress { .. })));

        drop(guard);
        let _again = lock.acquire().await.expect("reacquire after release");
    }

    #[tokio::test]
    async fn different_roots_do_not_contend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let timeout = Duration::from_millis(50);
        let a = FileUpdateLock::in_directory(dir.path(), Path::new("/opt/a"), timeout);
        let b = FileUpdateLock::in_directory(dir.path(), Path::new("/opt/b"), timeout);

        let _ga = a.acquire().await.expect("a");
        let _gb = b.acquire().await.expect("b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_left_by_dead_process_does_not_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = FileUpdateLock::in_directory(
            dir.path(),
            Path::new("/opt/app"),
            Duration::from_millis(500),
        );

        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let dead_pid = child.id();
        child.wait().expect("wait");
        std::fs::write(lock.lock_path(), dead_pid.to_string()).expect("write");

        let guard = lock.acquire().await.expect("leftover file is not ownership");
        let owner = std::fs::read_to_string(lock.lock_path()).expect("read");
        assert_eq!(owner, std::process::id().to_string());
        drop(guard);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_contenders_over_leftover_file_get_one_owner() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Path::new("/opt/app");
        let timeout = Duration::from_millis(150);

        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let dead_pid = child.id();
        child.wait().expect("wait");

        for _ in 0..10 {
            let seed = FileUpdateLock::in_directory(dir.path(), root, timeout);
            std::fs::write(seed.lock_path(), dead_pid.to_string()).expect("write");

            let contenders: Vec<_> = (0..4)
                .map(|_| {
                    let lock = FileUpdateLock::in_directory(dir.path(), root, timeout);
                    tokio::spawn(async move { lock.acquire().await })
                })
                .collect();

            let mut guards = Vec::new();
            let mut refused = 0;
            for contender in contenders {
                match contender.await.expect("join") {
                    Ok(guard) => guards.push(guard),
                    Err(SynupdError::UpdateInProgress { .. }) => refused += 1,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            assert_eq!(guards.len(), 1, "exactly one contender owns the lock");
            assert_eq!(refused, 3);
        }
    }

    #[tokio::test]
    async fn noop_lock_never_blocks() {
        let first = NoopUpdateLock.acquire().await.expect("first");
        let second = NoopUpdateLock.acquire().await.expect("second");
        assert!(first.path().is_none() && second.path().is_none());
    }
}
