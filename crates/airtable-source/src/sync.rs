//! Sync orchestrator
//!
//! Entry points for a full run, a single chunk and a dry run. Every entry
//! point returns a structured report; errors never escape to the caller.

use anyhow::{Context, Result};
use checkpoint::{LastRunSummary, RunLease, RunStateStore, SyncRunState};
use lead_store::LeadStore;
use lead_sync_airtable::ExternalSource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use sync_core::{FieldMappings, SyncCounters};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::controller::{ChunkResult, PaginationController};
use crate::mapper::map_record;
use crate::resolver::DimensionCache;

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct Config {
    /// Mapping to use; when unset the stored mapping is loaded
    pub mappings: Option<FieldMappings>,

    /// Records per page (1..=100)
    pub page_size: usize,

    /// Only fetch records without the synced flag, and set the flag after import
    pub smart_sync: bool,

    /// Boolean field in the external source that marks imported records
    pub synced_field: String,

    /// Records per write-back request (capped at the source's limit)
    pub write_back_batch_size: usize,

    /// Ceiling for one chunk invocation
    pub chunk_time_budget: Duration,

    /// Ceiling for a full run; the run stays resumable when it is hit
    pub full_sync_time_budget: Duration,

    /// How long a crashed invocation can block others
    pub lease_ttl: Duration,

    /// Records fetched by a dry run
    pub test_sample_size: usize,

    /// Sample mappings returned by a dry run
    pub test_sample_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mappings: None,
            page_size: 100,
            smart_sync: false,
            synced_field: "Synced".to_string(),
            write_back_batch_size: 10,
            chunk_time_budget: Duration::from_secs(25),
            full_sync_time_budget: Duration::from_secs(600),
            lease_ttl: Duration::from_secs(900),
            test_sample_size: 10,
            test_sample_limit: 5,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.smart_sync && self.synced_field.trim().is_empty() {
            anyhow::bail!("Smart sync needs the name of the synced field");
        }
        if self.chunk_time_budget.is_zero() || self.full_sync_time_budget.is_zero() {
            anyhow::bail!("Time budgets must be greater than zero");
        }
        // A full run may start its last chunk just before its budget runs out
        let longest_run = self.full_sync_time_budget + self.chunk_time_budget;
        if self.lease_ttl < longest_run {
            anyhow::bail!(
                "Lease TTL ({:?}) must cover the full-sync and chunk time budgets ({:?})",
                self.lease_ttl,
                longest_run
            );
        }
        Ok(())
    }
}

/// Outcome of a full run or a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Counters of the last chunk (chunk mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<SyncCounters>,
    /// Counters of the whole run so far
    pub cumulative: SyncCounters,
    /// Cursor to resume from; empty once the run is complete
    pub next_cursor: String,
    pub is_complete: bool,
}

impl SyncReport {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    fn from_error(e: &anyhow::Error) -> Self {
        Self::failure(format!("{e:#}"))
    }

    fn from_chunk(chunk: ChunkResult) -> Self {
        let message = if chunk.is_complete {
            format!(
                "Sync complete: {} processed, {} created, {} updated",
                chunk.cumulative.processed, chunk.cumulative.created, chunk.cumulative.updated
            )
        } else {
            format!(
                "Chunk done: {} processed, {} created, {} updated; more records pending",
                chunk.chunk.processed, chunk.chunk.created, chunk.chunk.updated
            )
        };
        Self {
            success: true,
            message,
            errors: chunk.errors,
            warnings: chunk.warnings,
            run_id: Some(chunk.run_id),
            chunk: Some(chunk.chunk),
            cumulative: chunk.cumulative,
            next_cursor: chunk.next_cursor,
            is_complete: chunk.is_complete,
        }
    }
}

/// Outcome of a dry run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestSyncReport {
    pub success: bool,
    pub message: String,
    pub errors: Vec<String>,
    pub records_fetched: usize,
    pub records_with_name: usize,
    pub records_with_email: usize,
    /// Records carrying a value for each mapped external field
    pub field_presence: BTreeMap<String, usize>,
    /// Fields the mapper had to skip
    pub diagnostics: Vec<String>,
    /// Mapped values of the first few records, dimension names under `*_name`
    pub samples: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Persisted state for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub last_run: Option<LastRunSummary>,
    pub in_progress: Option<SyncRunState>,
}

/// Read the last-run summary and any run in progress.
pub async fn load_status(state: &dyn RunStateStore) -> Result<SyncStatus> {
    Ok(SyncStatus {
        last_run: state.load_last_run().await?,
        in_progress: state.load_run_state().await?,
    })
}

/// The sync engine.
///
/// Holds the dimension cache for as long as it lives; one instance
/// corresponds to one invocation of the engine.
pub struct LeadSync<'a> {
    source: &'a dyn ExternalSource,
    store: &'a dyn LeadStore,
    state: &'a dyn RunStateStore,
    config: Config,
    cache: DimensionCache,
}

impl<'a> LeadSync<'a> {
    pub fn new(
        source: &'a dyn ExternalSource,
        store: &'a dyn LeadStore,
        state: &'a dyn RunStateStore,
        config: Config,
    ) -> Self {
        Self {
            source,
            store,
            state,
            config,
            cache: DimensionCache::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &DimensionCache {
        &self.cache
    }

    /// Cursor of the run in progress, or empty to start a new run.
    pub async fn resume_cursor(&self) -> Result<String> {
        Ok(self
            .state
            .load_run_state()
            .await?
            .filter(|run| !run.is_complete())
            .map(|run| run.cursor)
            .unwrap_or_default())
    }

    /// Run one chunk from `cursor` (empty starts a new run).
    pub async fn run_chunk(&mut self, cursor: &str) -> SyncReport {
        let (mappings, lease) = match self.prepare().await {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return SyncReport::failure("Sync already running"),
            Err(e) => return SyncReport::from_error(&e),
        };

        let deadline = Instant::now() + self.config.chunk_time_budget;
        let controller = PaginationController {
            source: self.source,
            store: self.store,
            state: self.state,
            config: &self.config,
            mappings: &mappings,
        };
        let result = controller.step(&mut self.cache, cursor, deadline).await;
        self.release(&lease).await;

        match result {
            Ok(chunk) => SyncReport::from_chunk(chunk),
            Err(e) => {
                warn!("Chunk at cursor '{cursor}' failed: {e:#}");
                SyncReport::from_error(&e)
            }
        }
    }

    /// Run chunks from the start until the source is exhausted or the
    /// full-sync budget runs out.
    pub async fn run_full_sync(&mut self) -> SyncReport {
        let (mappings, lease) = match self.prepare().await {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return SyncReport::failure("Sync already running"),
            Err(e) => return SyncReport::from_error(&e),
        };

        let started = Instant::now();
        let run_deadline = started + self.config.full_sync_time_budget;
        let controller = PaginationController {
            source: self.source,
            store: self.store,
            state: self.state,
            config: &self.config,
            mappings: &mappings,
        };

        let mut report = SyncReport {
            success: true,
            ..Default::default()
        };
        let mut cursor = String::new();
        loop {
            if !cursor.is_empty() && Instant::now() >= run_deadline {
                report.message = format!(
                    "Time budget of {:?} exhausted after {} records; resume from cursor '{cursor}'",
                    self.config.full_sync_time_budget, report.cumulative.processed
                );
                info!("{}", report.message);
                break;
            }
            let deadline = Instant::now() + self.config.chunk_time_budget;
            match controller.step(&mut self.cache, &cursor, deadline).await {
                Ok(chunk) => {
                    report.errors.extend(chunk.errors);
                    report.warnings.extend(chunk.warnings);
                    report.run_id = Some(chunk.run_id);
                    report.cumulative = chunk.cumulative;
                    report.next_cursor = chunk.next_cursor.clone();
                    report.is_complete = chunk.is_complete;
                    cursor = chunk.next_cursor;
                }
                Err(e) => {
                    warn!("Full sync stopped at cursor '{cursor}': {e:#}");
                    report.success = false;
                    report.message = format!("{e:#}");
                    report.next_cursor = cursor;
                    break;
                }
            }
            if report.is_complete {
                report.message = format!(
                    "Sync complete in {:.1}s: {} processed, {} created, {} updated",
                    started.elapsed().as_secs_f64(),
                    report.cumulative.processed,
                    report.cumulative.created,
                    report.cumulative.updated
                );
                break;
            }
        }

        self.release(&lease).await;
        report
    }

    /// Fetch a small sample and map it without writing anything.
    pub async fn run_test_sync(&self) -> TestSyncReport {
        match self.test_sync().await {
            Ok(report) => report,
            Err(e) => TestSyncReport {
                success: false,
                message: format!("{e:#}"),
                ..Default::default()
            },
        }
    }

    async fn test_sync(&self) -> Result<TestSyncReport> {
        self.config.validate()?;
        let (mappings, _) = self.load_mappings().await?;
        let controller = PaginationController {
            source: self.source,
            store: self.store,
            state: self.state,
            config: &self.config,
            mappings: &mappings,
        };
        let request = controller.page_request("", self.config.test_sample_size);
        let page = tokio::time::timeout(
            self.config.chunk_time_budget,
            self.source.fetch_page(&request),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Timed out fetching sample records"))??;

        let mut report = TestSyncReport {
            success: true,
            records_fetched: page.records.len(),
            ..Default::default()
        };
        for mapping in &mappings {
            report
                .field_presence
                .insert(mapping.external_field.clone(), 0);
        }

        for record in page.records.iter().take(self.config.test_sample_size) {
            let mapped = map_record(record, &mappings);
            if mapped.has("name") {
                report.records_with_name += 1;
            }
            if mapped.has("email") {
                report.records_with_email += 1;
            }
            for mapping in &mappings {
                if mapped.has(mapping.internal_field.trim()) {
                    *report
                        .field_presence
                        .entry(mapping.external_field.clone())
                        .or_default() += 1;
                }
            }
            report.diagnostics.extend(
                mapped
                    .diagnostics
                    .iter()
                    .map(|d| format!("{}: {d}", record.id)),
            );
            if report.samples.len() < self.config.test_sample_limit {
                report.samples.push(mapped.to_flat_map());
            }
        }

        report.message = format!(
            "Mapped {} sample records: {} with name, {} with email",
            report.records_fetched, report.records_with_name, report.records_with_email
        );
        Ok(report)
    }

    /// Validate, load the mapping and take the lease. `None` means another
    /// invocation holds the lease.
    async fn prepare(&self) -> Result<Option<(FieldMappings, RunLease)>> {
        self.config.validate()?;
        let (mappings, legacy) = self.load_mappings().await?;

        let ttl = chrono::Duration::from_std(self.config.lease_ttl)
            .context("Lease TTL is out of range")?;
        let lease = RunLease::new(ttl);
        if !self.state.try_acquire_lease(&lease).await? {
            warn!("Another sync invocation holds the lease");
            return Ok(None);
        }
        debug!("Acquired sync lease {}", lease.owner);
        if legacy {
            self.rewrite_stored_mappings(&mappings).await;
        }
        Ok(Some((mappings, lease)))
    }

    async fn release(&self, lease: &RunLease) {
        if let Err(e) = self.state.release_lease(&lease.owner).await {
            warn!("Failed to release sync lease: {e:#}");
        }
    }

    /// Configured mapping, or the stored one parsed defensively.
    ///
    /// The flag is set when the stored text is in a legacy format.
    async fn load_mappings(&self) -> Result<(FieldMappings, bool)> {
        if let Some(mappings) = &self.config.mappings {
            if mappings.is_empty() {
                anyhow::bail!("Field mapping is empty");
            }
            return Ok((mappings.clone(), false));
        }

        let stored = self
            .store
            .load_field_mapping()
            .await
            .context("Failed to read the stored field mapping")?
            .unwrap_or_default();
        let parsed = FieldMappings::parse_stored(&stored);
        for diagnostic in &parsed.diagnostics {
            warn!("Field mapping: {diagnostic}");
        }
        if parsed.mappings.is_empty() {
            anyhow::bail!("No field mapping configured");
        }
        Ok((parsed.mappings, parsed.normalized))
    }

    async fn rewrite_stored_mappings(&self, mappings: &FieldMappings) {
        match self.store.save_field_mapping(&mappings.to_stored()).await {
            Ok(()) => info!("Rewrote stored field mapping in the current format"),
            Err(e) => warn!("Failed to rewrite stored field mapping: {e:#}"),
        }
    }
}
