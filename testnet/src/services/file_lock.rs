//! Cross-process file lock
//!
//! The lock is held while the lock directory exists; `mkdir` is the only
//! atomic step. `lock.json` inside it records who holds it and is used only
//! to decide whether an existing lock is stale:
//!
//! - older than the max age: stale whoever holds it
//! - same host and the recorded pid is gone: stale (unverifiable pids only age out)
//! - another host: never reclaimed by liveness, only by age

use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::time::{sleep, Instant};

use crate::error::{LockFailure, TestnetError, TestnetResult};

pub const LOCK_METADATA_FILE: &str = "lock.json";

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(120);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Advisory holder information written into the lock directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockMetadata {
    pub pid: u32,
    /// Unix time in milliseconds
    pub timestamp: i64,
    pub host_id: String,
}

impl LockMetadata {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now().timestamp_millis(),
            host_id: host_id(),
        }
    }

    pub fn age(&self) -> Duration {
        let age_ms = Utc::now().timestamp_millis().saturating_sub(self.timestamp).max(0);
        Duration::from_millis(age_ms as u64)
    }
}

/// Directory-based mutual exclusion with staleness detection
#[derive(Debug, Clone)]
pub struct FileLock {
    max_age: Duration,
    poll_interval: Duration,
}

impl FileLock {
    pub fn new() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Configure the age after which any lock is considered stale (fluent API)
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Configure the retry interval while waiting (fluent API)
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Take the lock at `lock_path`, waiting up to `timeout`
    pub async fn acquire(&self, lock_path: &Path, timeout: Duration) -> TestnetResult<()> {
        let deadline = Instant::now() + timeout;

        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent).await;
            }
        }

        loop {
            if self.try_acquire(lock_path).await? {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("⏰ Timed out waiting for lock {}", lock_path.display());
                return Err(TestnetError::FileLock {
                    reason: LockFailure::Timeout,
                    lock_path: lock_path.to_path_buf(),
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// One acquisition attempt; a stale lock is cleared and retried once
    pub async fn try_acquire(&self, lock_path: &Path) -> TestnetResult<bool> {
        for _ in 0..2 {
            match fs::create_dir(lock_path).await {
                Ok(()) => {
                    write_metadata(lock_path).await;
                    tracing::debug!("🔒 Acquired lock {}", lock_path.display());
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !self.clear_if_stale(lock_path).await {
                        return Ok(false);
                    }
                }
                Err(e) => {
                    tracing::warn!("⚠️ Cannot create lock {}: {}", lock_path.display(), e);
                    return Err(TestnetError::FileLock {
                        reason: LockFailure::AcquisitionFailed,
                        lock_path: lock_path.to_path_buf(),
                    });
                }
            }
        }
        Ok(false)
    }

    /// Remove the lock directory; a missing lock is not an error
    pub async fn release(&self, lock_path: &Path) -> TestnetResult<()> {
        match fs::remove_dir_all(lock_path).await {
            Ok(()) => {
                tracing::debug!("🔓 Released lock {}", lock_path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Run `effect` while holding the lock; the lock is released on every exit
    /// path, including when the returned future is dropped before completion
    pub async fn with_lock<T, F, Fut>(&self, lock_path: &Path, timeout: Duration, effect: F) -> TestnetResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TestnetResult<T>>,
    {
        self.acquire(lock_path, timeout).await?;
        let mut guard = LockGuard {
            path: lock_path.to_path_buf(),
            armed: true,
        };

        let outcome = effect().await;

        guard.armed = false;
        let released = self.release(lock_path).await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(release_error) = released {
                    tracing::warn!("⚠️ Failed to release lock {}: {}", lock_path.display(), release_error);
                }
                Err(e)
            }
        }
    }

    /// Remove the lock if it is stale; true when it was removed
    async fn clear_if_stale(&self, lock_path: &Path) -> bool {
        let metadata = read_metadata(lock_path).await;
        let Some(reason) = self.staleness(lock_path, metadata.as_ref()).await else {
            return false;
        };

        // The holder may have changed since the metadata was read
        if read_metadata(lock_path).await != metadata {
            return false;
        }

        match fs::remove_dir_all(lock_path).await {
            Ok(()) => {
                tracing::warn!(
                    pid = metadata.as_ref().map(|m| m.pid),
                    "♻️ Reclaimed stale lock {} ({})",
                    lock_path.display(),
                    reason
                );
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("⚠️ Failed to remove stale lock {}: {}", lock_path.display(), e);
                false
            }
        }
    }

    async fn staleness(&self, lock_path: &Path, metadata: Option<&LockMetadata>) -> Option<&'static str> {
        match metadata {
            Some(metadata) => {
                if metadata.age() > self.max_age {
                    Some("expired")
                } else if metadata.host_id == host_id()
                    && is_verifiable_pid(metadata.pid)
                    && !is_pid_alive(metadata.pid)
                {
                    Some("holder process is gone")
                } else {
                    None
                }
            }
            // No readable metadata: age by the directory itself
            None => {
                let modified = fs::metadata(lock_path).await.ok()?.modified().ok()?;
                let age = SystemTime::now().duration_since(modified).unwrap_or_default();
                (age > self.max_age).then_some("expired without metadata")
            }
        }
    }
}

impl Default for FileLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the lock synchronously if `with_lock` is abandoned mid-effect
struct LockGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Write `lock.json`; failure leaves the lock held
async fn write_metadata(lock_path: &Path) {
    let metadata = LockMetadata::current();
    let written = match serde_json::to_vec_pretty(&metadata) {
        Ok(bytes) => fs::write(lock_path.join(LOCK_METADATA_FILE), bytes).await.map_err(TestnetError::from),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = written {
        tracing::warn!("⚠️ Lock {} held without metadata: {}", lock_path.display(), e);
    }
}

async fn read_metadata(lock_path: &Path) -> Option<LockMetadata> {
    let contents = fs::read(lock_path.join(LOCK_METADATA_FILE)).await.ok()?;
    serde_json::from_slice(&contents).ok()
}

/// Identity of this machine as recorded in lock metadata
pub fn host_id() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Whether `pid` names a single process that signal 0 can check.
/// 0 and values above `i32::MAX` would address process groups instead.
pub fn is_verifiable_pid(pid: u32) -> bool {
    pid != 0 && i32::try_from(pid).is_ok()
}

/// A pid is dead once signal 0 reports it does not exist
pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw == 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
