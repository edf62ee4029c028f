//! Batch writer: one multi-row insert for new leads, one update per matched lead.

use anyhow::Result;
use lead_store::{LeadRow, LeadStore};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::match_index::{MatchIndex, MatchOutcome};

/// Result of writing one page of prepared rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
    /// External ids of records written successfully, in write order
    pub written_ids: Vec<String>,
    pub errors: Vec<String>,
}

/// Keep the last row for each external id, in order of last occurrence.
pub fn dedupe(rows: Vec<LeadRow>) -> Vec<LeadRow> {
    let mut last: HashMap<String, usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        last.insert(row.external_id.clone(), i);
    }
    let dropped = rows.len() - last.len();
    if dropped > 0 {
        debug!("Dropped {dropped} duplicate records within the page");
    }
    rows.into_iter()
        .enumerate()
        .filter(|(i, row)| last.get(&row.external_id) == Some(i))
        .map(|(_, row)| row)
        .collect()
}

pub struct BatchWriter<'a> {
    store: &'a dyn LeadStore,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn LeadStore) -> Self {
        Self { store }
    }

    /// Classify and write a page of rows.
    ///
    /// Fails only when the match query fails. Individual insert and update
    /// failures are counted and reported in the outcome.
    pub async fn write(&self, rows: Vec<LeadRow>) -> Result<WriteOutcome> {
        let rows = dedupe(rows);
        let emails: Vec<String> = rows
            .iter()
            .filter_map(|r| r.email().map(str::to_string))
            .collect();
        let external_ids: Vec<String> = rows.iter().map(|r| r.external_id.clone()).collect();
        let index = MatchIndex::build(self.store, &emails, &external_ids).await?;

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut claimed = HashSet::new();
        for row in rows {
            match index.classify(&row.external_id, row.email()) {
                MatchOutcome::Update {
                    lead_id,
                    claim_external_id,
                } if !claim_external_id || claimed.insert(lead_id) => {
                    updates.push((lead_id, claim_external_id, row));
                }
                // The lead was already claimed by an earlier record in this page
                MatchOutcome::Update { .. } | MatchOutcome::Insert => inserts.push(row),
            }
        }

        let mut outcome = WriteOutcome::default();
        self.insert_all(inserts, &mut outcome).await;
        for (lead_id, claim, row) in updates {
            match self.store.update_lead(lead_id, &row, claim).await {
                Ok(()) => {
                    outcome.updated += 1;
                    outcome.written_ids.push(row.external_id);
                }
                Err(e) => {
                    warn!("Failed to update lead {lead_id} from {}: {e:#}", row.external_id);
                    outcome.failed += 1;
                    outcome.errors.push(format!("{}: {e:#}", row.external_id));
                }
            }
        }
        debug!(
            "Wrote page: {} created, {} updated, {} failed",
            outcome.created, outcome.updated, outcome.failed
        );
        Ok(outcome)
    }

    /// Bulk insert; on failure retry row by row to isolate the bad records.
    async fn insert_all(&self, rows: Vec<LeadRow>, outcome: &mut WriteOutcome) {
        if rows.is_empty() {
            return;
        }
        match self.store.insert_leads(&rows).await {
            Ok(written) => {
                outcome.created += written;
                outcome
                    .written_ids
                    .extend(rows.into_iter().map(|r| r.external_id));
                return;
            }
            Err(e) => warn!(
                "Bulk insert of {} leads failed, retrying individually: {e:#}",
                rows.len()
            ),
        }
        for row in rows {
            match self.store.insert_leads(std::slice::from_ref(&row)).await {
                Ok(written) => {
                    outcome.created += written;
                    outcome.written_ids.push(row.external_id);
                }
                Err(e) => {
                    warn!("Failed to insert lead from {}: {e:#}", row.external_id);
                    outcome.failed += 1;
                    outcome.errors.push(format!("{}: {e:#}", row.external_id));
                }
            }
        }
    }
}
