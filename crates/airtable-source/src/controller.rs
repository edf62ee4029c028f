//! Pagination controller: one page of work per step.
//!
//! ```text
//! START (empty cursor) ──► IN_PROGRESS (cursor + counters persisted) ──► COMPLETE
//!                              ▲           │
//!                              └───────────┘ one step per invocation
//! ```
//!
//! Starting clears any previous run state. Every step fetches a page, runs
//! it through mapper, resolver, match index and writer, optionally flags the
//! written records in the source, and persists the cumulative counters. The
//! step that sees the last page moves the counters into the last-run summary.
//! A retry of the step saved last writes its page again without counting it twice.

use anyhow::{Context, Result};
use checkpoint::{RunPhase, RunStateStore, SyncRunState};
use lead_store::{LeadRow, LeadStore};
use lead_sync_airtable::{unsynced_formula, ExternalSource, PageRequest};
use serde::Serialize;
use sync_core::{ExternalRecord, FieldMappings, SyncCounters};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::mapper::map_record;
use crate::marker::WriteBackMarker;
use crate::resolver::{DimensionCache, EntityResolver};
use crate::writer::BatchWriter;
use crate::Config;

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkResult {
    pub run_id: String,
    /// Counters of this step only
    pub chunk: SyncCounters,
    /// Counters of the whole run so far, this step included
    pub cumulative: SyncCounters,
    /// Cursor to pass to the next step; empty once the run is complete
    pub next_cursor: String,
    pub is_complete: bool,
    /// Per-record write failures
    pub errors: Vec<String>,
    /// Fields skipped by the mapper
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
struct PageOutcome {
    counters: SyncCounters,
    errors: Vec<String>,
    warnings: Vec<String>,
}

pub struct PaginationController<'a> {
    pub source: &'a dyn ExternalSource,
    pub store: &'a dyn LeadStore,
    pub state: &'a dyn RunStateStore,
    pub config: &'a Config,
    pub mappings: &'a FieldMappings,
}

impl PaginationController<'_> {
    /// Page request for a cursor, filtered to unsynced records in smart-sync mode.
    pub fn page_request(&self, cursor: &str, page_size: usize) -> PageRequest {
        PageRequest::new(page_size)
            .with_offset(cursor)
            .with_filter(
                self.config
                    .smart_sync
                    .then(|| unsynced_formula(&self.config.synced_field)),
            )
    }

    /// Run one step from `cursor`. The step must finish by `deadline`.
    pub async fn step(
        &self,
        cache: &mut DimensionCache,
        cursor: &str,
        deadline: Instant,
    ) -> Result<ChunkResult> {
        let (mut run, replay) = self.begin(cache, cursor).await?;
        if !cache.is_primed() {
            cache
                .prime(self.store)
                .await
                .context("Failed to load dimension tables")?;
        }

        let request = self.page_request(cursor, self.config.page_size);
        let page = tokio::time::timeout_at(deadline, self.source.fetch_page(&request))
            .await
            .map_err(|_| anyhow::anyhow!("Timed out fetching records at cursor '{cursor}'"))??;
        debug!(
            "Fetched {} records at cursor '{cursor}'",
            page.records.len()
        );

        let outcome = self.process_page(cache, &page.records, deadline).await?;
        if replay {
            // Counters of this page are already in the saved run
            warn!(
                "Cursor '{cursor}' was already counted in run {}; continue from '{}'",
                run.run_id, run.cursor
            );
            return Ok(ChunkResult {
                run_id: run.run_id,
                chunk: outcome.counters,
                cumulative: run.counters,
                next_cursor: run.cursor,
                is_complete: false,
                errors: outcome.errors,
                warnings: outcome.warnings,
            });
        }

        let next_cursor = page.next_cursor();
        run.advance(&outcome.counters, &next_cursor, &outcome.errors);

        let is_complete = run.is_complete();
        if is_complete {
            self.state.save_last_run(&run.summary()).await?;
            self.state.clear_run_state().await?;
            info!(
                "Sync run {} complete after {} chunks: {} processed, {} created, {} updated, {} failed",
                run.run_id,
                run.chunks,
                run.counters.processed,
                run.counters.created,
                run.counters.updated,
                run.counters.failed
            );
        } else {
            self.state.save_run_state(&run).await?;
            info!(
                "Sync run {} chunk {} done: {} processed so far",
                run.run_id, run.chunks, run.counters.processed
            );
        }

        Ok(ChunkResult {
            run_id: run.run_id,
            chunk: outcome.counters,
            cumulative: run.counters,
            next_cursor,
            is_complete,
            errors: outcome.errors,
            warnings: outcome.warnings,
        })
    }

    /// Load or create the run state for `cursor`.
    ///
    /// The flag is set when `cursor` is a retry of the chunk saved last.
    async fn begin(
        &self,
        cache: &mut DimensionCache,
        cursor: &str,
    ) -> Result<(SyncRunState, bool)> {
        if cursor.is_empty() {
            self.state.clear_run_state().await?;
            cache.clear();
            let run = SyncRunState::start();
            info!("Starting sync run {}", run.run_id);
            return Ok((run, false));
        }

        match self.state.load_run_state().await? {
            Some(run) if !run.is_complete() => {
                if run.already_counted(cursor) {
                    return Ok((run, true));
                }
                if run.cursor != cursor {
                    warn!(
                        "Cursor '{cursor}' differs from the saved cursor '{}'; continuing from the given cursor",
                        run.cursor
                    );
                }
                Ok((run, false))
            }
            _ => {
                warn!("No run in progress for cursor '{cursor}'; counting from zero");
                let mut run = SyncRunState::start();
                run.cursor = cursor.to_string();
                run.phase = RunPhase::InProgress;
                Ok((run, false))
            }
        }
    }

    async fn process_page(
        &self,
        cache: &mut DimensionCache,
        records: &[ExternalRecord],
        deadline: Instant,
    ) -> Result<PageOutcome> {
        let mut outcome = PageOutcome::default();
        outcome.counters.processed = records.len() as u64;

        let resolver = EntityResolver::new(self.store);
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let mapped = map_record(record, self.mappings);
            for diagnostic in &mapped.diagnostics {
                warn!("{}: {diagnostic}", record.id);
                outcome.warnings.push(format!("{}: {diagnostic}", record.id));
            }

            let mut row = LeadRow::new(mapped.external_id);
            row.values = mapped.values;
            for (kind, staged) in mapped.staged {
                if let Some(resolved) = resolver
                    .resolve(cache, kind, &staged.name, staged.auto_create)
                    .await
                {
                    row.foreign_keys.insert(kind, resolved.id);
                    if resolved.created {
                        outcome.counters.record_dimension_created(kind);
                    }
                }
            }
            rows.push(row);
        }

        let written = BatchWriter::new(self.store)
            .write(rows)
            .await
            .context("Failed to match records against existing leads")?;
        outcome.counters.created = written.created;
        outcome.counters.updated = written.updated;
        outcome.counters.failed = written.failed;
        outcome.errors = written.errors;

        if self.config.smart_sync && !written.written_ids.is_empty() {
            let marked = WriteBackMarker::new(
                self.source,
                &self.config.synced_field,
                self.config.write_back_batch_size,
            )
            .flush(&written.written_ids, Some(deadline))
            .await;
            outcome.counters.marked = marked.marked;
        }

        Ok(outcome)
    }
}
