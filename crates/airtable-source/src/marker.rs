//! Write-back marker: flag imported records as synced in the external source.

use lead_sync_airtable::{ExternalSource, MAX_RECORDS_PER_REQUEST};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MarkOutcome {
    pub marked: u64,
    pub failed_batches: usize,
    /// Batches not sent because the deadline passed
    pub skipped_batches: usize,
}

pub struct WriteBackMarker<'a> {
    source: &'a dyn ExternalSource,
    synced_field: &'a str,
    batch_size: usize,
}

impl<'a> WriteBackMarker<'a> {
    /// `batch_size` is capped at the source's per-request limit.
    pub fn new(source: &'a dyn ExternalSource, synced_field: &'a str, batch_size: usize) -> Self {
        Self {
            source,
            synced_field,
            batch_size: batch_size.clamp(1, MAX_RECORDS_PER_REQUEST),
        }
    }

    /// Send the ids in batches. Failed batches are logged and skipped; the
    /// records stay unflagged and are picked up again by a later run.
    pub async fn flush(&self, record_ids: &[String], deadline: Option<Instant>) -> MarkOutcome {
        let mut outcome = MarkOutcome::default();
        let batches: Vec<&[String]> = record_ids.chunks(self.batch_size).collect();
        for (i, batch) in batches.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                outcome.skipped_batches = batches.len() - i;
                warn!(
                    "Time budget exhausted, {} write-back batches left for the next run",
                    outcome.skipped_batches
                );
                break;
            }
            match self.source.mark_synced(batch, self.synced_field).await {
                Ok(()) => outcome.marked += batch.len() as u64,
                Err(e) => {
                    outcome.failed_batches += 1;
                    warn!("Failed to mark {} records as synced: {e:#}", batch.len());
                }
            }
        }
        debug!("Marked {} records as synced", outcome.marked);
        outcome
    }
}
