//! Persisted run state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_core::SyncCounters;

use crate::RunPhase;

/// Maximum number of error messages carried across chunks.
const MAX_CARRIED_ERRORS: usize = 100;

/// State that ties the chunks of one run together.
///
/// Loaded at the start of every chunk invocation and saved at its end. The
/// cursor is the external source's opaque continuation token; an empty cursor
/// together with [`RunPhase::Start`] means the run has not fetched anything yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunState {
    pub run_id: String,
    pub phase: RunPhase,
    pub cursor: String,
    /// Cursor of the last chunk folded into `counters`
    #[serde(default)]
    pub previous_cursor: String,
    /// Cumulative counters across all chunks of this run
    pub counters: SyncCounters,
    pub chunks: u32,
    /// Most recent per-record error messages, oldest dropped first
    #[serde(default)]
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRunState {
    /// Fresh state for a new run.
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            phase: RunPhase::Start,
            cursor: String::new(),
            previous_cursor: String::new(),
            counters: SyncCounters::default(),
            chunks: 0,
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Fold one finished chunk into the run.
    ///
    /// An empty `next_cursor` completes the run.
    pub fn advance(&mut self, chunk: &SyncCounters, next_cursor: &str, errors: &[String]) {
        self.counters.merge(chunk);
        self.chunks += 1;
        self.previous_cursor = std::mem::replace(&mut self.cursor, next_cursor.to_string());
        self.phase = if next_cursor.is_empty() {
            RunPhase::Complete
        } else {
            RunPhase::InProgress
        };
        self.errors.extend(errors.iter().cloned());
        if self.errors.len() > MAX_CARRIED_ERRORS {
            let excess = self.errors.len() - MAX_CARRIED_ERRORS;
            self.errors.drain(..excess);
        }
        self.updated_at = Utc::now();
    }

    /// Whether `cursor` is the one whose chunk was folded in last.
    ///
    /// A retried chunk asks for this cursor again after its counters were saved.
    pub fn already_counted(&self, cursor: &str) -> bool {
        self.chunks > 0 && cursor == self.previous_cursor && cursor != self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.phase == RunPhase::Complete
    }

    pub fn summary(&self) -> LastRunSummary {
        LastRunSummary {
            run_id: self.run_id.clone(),
            counters: self.counters,
            chunks: self.chunks,
            error_count: self.errors.len(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Permanent summary of the last completed run.
///
/// `finished_at` doubles as the last-sync timestamp shown by the admin UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRunSummary {
    pub run_id: String,
    pub counters: SyncCounters,
    pub chunks: u32,
    pub error_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
