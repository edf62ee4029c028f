//! Run state storage trait and types
//!
//! Backends only implement a small key/value surface plus the lease
//! primitives; typed access to [`SyncRunState`] and [`LastRunSummary`] is
//! provided on top of it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{LastRunSummary, SyncRunState};

/// Key of the in-progress run state. Cleared when a run completes.
pub const RUN_STATE_KEY: &str = "sync_run_state";

/// Key of the last completed run summary.
pub const LAST_RUN_KEY: &str = "sync_last_run";

/// Name of the engine-wide lease.
pub const LEASE_NAME: &str = "lead_sync";

/// Exclusive, time-limited claim on the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLease {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RunLease {
    /// New lease for a random owner id.
    pub fn new(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            owner: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether `self` may replace the currently held lease `held`.
    pub fn can_replace(&self, held: &RunLease) -> bool {
        held.owner == self.owner || held.is_expired(self.acquired_at)
    }
}

/// Trait for run state storage operations.
///
/// This trait abstracts the storage backend so the same run logic works with:
/// - Filesystem storage (`FilesystemStore`)
/// - Process memory (`MemoryStore`)
/// - The PostgreSQL options table (`PgLeadStore` in the lead-store crate)
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Read a raw value. Returns None if the key doesn't exist.
    async fn get_value(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a raw value.
    async fn put_value(&self, key: &str, value: String) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete_value(&self, key: &str) -> Result<()>;

    /// Claim the engine lease. Returns false when another owner holds an unexpired lease.
    async fn try_acquire_lease(&self, lease: &RunLease) -> Result<bool>;

    /// Release the lease if `owner` still holds it.
    async fn release_lease(&self, owner: &str) -> Result<()>;

    async fn load_run_state(&self) -> Result<Option<SyncRunState>> {
        match self.get_value(RUN_STATE_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(state) => Ok(Some(state)),
                Err(e) => {
                    tracing::warn!("Discarding unreadable run state: {e}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn save_run_state(&self, state: &SyncRunState) -> Result<()> {
        let raw = serde_json::to_string(state).context("Failed to serialize run state")?;
        self.put_value(RUN_STATE_KEY, raw).await
    }

    async fn clear_run_state(&self) -> Result<()> {
        self.delete_value(RUN_STATE_KEY).await
    }

    async fn load_last_run(&self) -> Result<Option<LastRunSummary>> {
        match self.get_value(LAST_RUN_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    async fn save_last_run(&self, summary: &LastRunSummary) -> Result<()> {
        let raw = serde_json::to_string(summary).context("Failed to serialize run summary")?;
        self.put_value(LAST_RUN_KEY, raw).await
    }
}
