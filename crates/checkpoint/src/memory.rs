//! Process-local run state storage.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::{RunLease, RunStateStore};

/// In-memory implementation of RunStateStore.
///
/// State lives only as long as the value does. Used by tests and by dry runs
/// that must not touch persistent storage.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    lease: Mutex<Option<RunLease>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently held lease, if any.
    pub fn current_lease(&self) -> Option<RunLease> {
        self.lease.lock().map(|l| l.clone()).unwrap_or(None)
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("memory store lock poisoned")
}

#[async_trait]
impl RunStateStore for MemoryStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().map_err(poisoned)?.get(key).cloned())
    }

    async fn put_value(&self, key: &str, value: String) -> Result<()> {
        self.values
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<()> {
        self.values.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }

    async fn try_acquire_lease(&self, lease: &RunLease) -> Result<bool> {
        let mut held = self.lease.lock().map_err(poisoned)?;
        match held.as_ref() {
            Some(current) if !lease.can_replace(current) => Ok(false),
            _ => {
                *held = Some(lease.clone());
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, owner: &str) -> Result<()> {
        let mut held = self.lease.lock().map_err(poisoned)?;
        if held.as_ref().map(|l| l.owner == owner).unwrap_or(false) {
            *held = None;
        }
        Ok(())
    }
}
