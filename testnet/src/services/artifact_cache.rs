//! Content-addressed cache of built artifacts shared between workers
//!
//! Every artifact lives at `<root>/<key>`. Building happens under a
//! per-key [`FileLock`] so concurrent workers build each artifact once.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{TestnetError, TestnetResult};
use crate::services::file_lock::FileLock;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    lock: FileLock,
    lock_timeout: Duration,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: FileLock::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Configure how long to wait for another builder (fluent API)
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Configure the lock used to serialize builders (fluent API)
    pub fn with_file_lock(mut self, lock: FileLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hex key for a set of inputs; stable for a given toolchain.
    /// Input boundaries are part of the key.
    pub fn key_for(inputs: &[&[u8]]) -> String {
        let mut hasher = DefaultHasher::new();
        for input in inputs {
            input.len().hash(&mut hasher);
            input.hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }

    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.lock"))
    }

    /// Return the cached artifact for `key`, building it first if absent.
    ///
    /// `build` receives a scratch path to write to; it is moved into place
    /// only when the build succeeds.
    pub async fn get_or_build<F, Fut>(&self, key: &str, build: F) -> TestnetResult<PathBuf>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = TestnetResult<()>>,
    {
        validate_key(key)?;
        let artifact = self.artifact_path(key);
        if fs::try_exists(&artifact).await? {
            tracing::debug!("📦 Cache hit for {}", key);
            return Ok(artifact);
        }

        fs::create_dir_all(&self.root).await?;
        let lock_path = self.lock_path(key);

        self.lock
            .with_lock(&lock_path, self.lock_timeout, || async {
                // Another worker may have finished while we waited
                if fs::try_exists(&artifact).await? {
                    tracing::debug!("📦 {} was built by another worker", key);
                    return Ok(artifact.clone());
                }

                let scratch = self.root.join(format!(".{key}.partial.{}", std::process::id()));
                remove_path(&scratch).await;

                tracing::info!("🔨 Building artifact {}", key);
                if let Err(e) = build(scratch.clone()).await {
                    remove_path(&scratch).await;
                    return Err(e);
                }

                if let Err(e) = fs::rename(&scratch, &artifact).await {
                    remove_path(&scratch).await;
                    return Err(e.into());
                }
                tracing::info!("✅ Cached artifact {} at {}", key, artifact.display());
                Ok(artifact.clone())
            })
            .await
    }

    /// Remove a cached artifact; a missing one is not an error
    pub async fn evict(&self, key: &str) -> TestnetResult<()> {
        validate_key(key)?;
        match remove_existing(&self.artifact_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_key(key: &str) -> TestnetResult<()> {
    if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
        return Err(TestnetError::config(format!("invalid artifact key {key:?}")));
    }
    Ok(())
}

async fn remove_existing(path: &Path) -> std::io::Result<()> {
    if fs::metadata(path).await?.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}

async fn remove_path(path: &Path) {
    let _ = remove_existing(path).await;
}
