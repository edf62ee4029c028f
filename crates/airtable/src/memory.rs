//! In-memory [`ExternalSource`] serving a fixed record set.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Mutex;
use sync_core::ExternalRecord;

use crate::{ExternalSource, Page, PageRequest, MAX_RECORDS_PER_REQUEST};

#[derive(Default)]
struct Inner {
    records: Vec<ExternalRecord>,
    requests: Vec<PageRequest>,
    mark_batches: Vec<Vec<String>>,
    fail_fetch_at: Option<usize>,
    fail_marks_containing: HashSet<String>,
}

/// Serves records in pages using `page-{index}` cursors.
///
/// Understands the `NOT({field})` filter produced by [`crate::unsynced_formula`]
/// and applies write-back to its own records, so smart-sync runs behave like
/// they would against the real service.
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

impl MemorySource {
    pub fn new(records: Vec<ExternalRecord>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records,
                ..Default::default()
            }),
        }
    }

    /// Fail the n-th fetch (0-based) with a transport error.
    pub fn fail_fetch_at(&self, request_index: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_fetch_at = Some(request_index);
        }
    }

    /// Fail any write-back batch containing this record id.
    pub fn fail_marks_containing(&self, record_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_marks_containing.insert(record_id.to_string());
        }
    }

    /// Replace the served records.
    pub fn set_records(&self, records: Vec<ExternalRecord>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.records = records;
        }
    }

    pub fn records(&self) -> Vec<ExternalRecord> {
        self.inner
            .lock()
            .map(|i| i.records.clone())
            .unwrap_or_default()
    }

    /// Page requests received so far.
    pub fn requests(&self) -> Vec<PageRequest> {
        self.inner
            .lock()
            .map(|i| i.requests.clone())
            .unwrap_or_default()
    }

    /// Write-back batches received so far, including failed ones.
    pub fn mark_batches(&self) -> Vec<Vec<String>> {
        self.inner
            .lock()
            .map(|i| i.mark_batches.clone())
            .unwrap_or_default()
    }
}

fn filter_field(formula: &str) -> Option<&str> {
    formula.strip_prefix("NOT({")?.strip_suffix("})")
}

#[async_trait::async_trait]
impl ExternalSource for MemorySource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory source lock poisoned"))?;
        let index = inner.requests.len();
        inner.requests.push(request.clone());
        if inner.fail_fetch_at == Some(index) {
            anyhow::bail!("Record fetch failed with status 503 Service Unavailable");
        }

        let filter = match request.filter_formula.as_deref() {
            Some(formula) => Some(
                filter_field(formula)
                    .ok_or_else(|| anyhow::anyhow!("Unsupported filter formula: {formula}"))?
                    .to_string(),
            ),
            None => None,
        };
        let visible = |r: &ExternalRecord| filter.as_deref().map_or(true, |f| !r.is_synced(f));

        // Offsets index the unfiltered list so marking records between
        // fetches does not shift later pages
        let start = if request.offset.is_empty() {
            0
        } else {
            request
                .offset
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| anyhow::anyhow!("Invalid offset: {}", request.offset))?
        };
        let page_size = request.page_size.max(1);
        let mut records = Vec::new();
        let mut position = start;
        while position < inner.records.len() && records.len() < page_size {
            if visible(&inner.records[position]) {
                records.push(inner.records[position].clone());
            }
            position += 1;
        }
        let more = inner.records[position.min(inner.records.len())..]
            .iter()
            .any(|r| visible(r));
        let offset = more.then(|| format!("page-{position}"));

        Ok(Page { records, offset })
    }

    async fn mark_synced(&self, record_ids: &[String], synced_field: &str) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory source lock poisoned"))?;
        inner.mark_batches.push(record_ids.to_vec());
        if record_ids.len() > MAX_RECORDS_PER_REQUEST {
            anyhow::bail!("Write-back failed with status 422: too many records");
        }
        if record_ids
            .iter()
            .any(|id| inner.fail_marks_containing.contains(id))
        {
            anyhow::bail!("Write-back failed with status 500 Internal Server Error");
        }
        for record in inner.records.iter_mut() {
            if record_ids.contains(&record.id) {
                record
                    .fields
                    .insert(synced_field.to_string(), serde_json::Value::Bool(true));
            }
        }
        Ok(())
    }
}
