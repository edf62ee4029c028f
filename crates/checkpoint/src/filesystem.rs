//! Filesystem-based run state storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use crate::store::{RunLease, RunStateStore, LEASE_NAME};

/// Filesystem implementation of RunStateStore trait.
///
/// Stores each key as `{key}.json` in a directory. The lease lives in
/// `{LEASE_NAME}.lease`; every read-decide-write on it happens under an
/// exclusive advisory lock on `{LEASE_NAME}.lock`, which the OS drops if the
/// process dies.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn lease_path(&self) -> PathBuf {
        self.dir.join(format!("{LEASE_NAME}.lease"))
    }

    /// Exclusive lock guarding the lease file; released when the file is dropped.
    fn lock_lease(&self) -> Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{LEASE_NAME}.lock"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(file)
    }

    fn read_lease(&self) -> Result<Option<RunLease>> {
        let path = self.lease_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        // An unreadable lease file is treated as expired
        Ok(serde_json::from_str(&content).ok())
    }

    /// Replace the lease file in one rename.
    fn write_lease(&self, lease: &RunLease) -> Result<()> {
        let path = self.lease_path();
        let tmp = self.dir.join(format!("{LEASE_NAME}.lease.{}.tmp", lease.owner));
        std::fs::write(&tmp, serde_json::to_string(lease)?)?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl RunStateStore for FilesystemStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let path = self.value_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(content))
    }

    async fn put_value(&self, key: &str, value: String) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.value_path(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!("Stored {key} to {}", path.display());
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_acquire_lease(&self, lease: &RunLease) -> Result<bool> {
        let _lock = self.lock_lease()?;
        if let Some(held) = self.read_lease()? {
            if !lease.can_replace(&held) {
                tracing::debug!("Lease held by {} until {}", held.owner, held.expires_at);
                return Ok(false);
            }
        }
        self.write_lease(lease)?;
        Ok(true)
    }

    async fn release_lease(&self, owner: &str) -> Result<()> {
        let _lock = self.lock_lease()?;
        if let Some(held) = self.read_lease()? {
            if held.owner == owner {
                std::fs::remove_file(self.lease_path())?;
            }
        }
        Ok(())
    }
}
