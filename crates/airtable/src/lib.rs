//! Client for the external tabular source
//!
//! The source exposes a table of records over HTTP:
//!
//! - `GET /{base}/{table}?pageSize=N[&offset=cursor][&filterByFormula=expr]` returns
//!   `{records: [{id, fields}], offset?}`; a missing `offset` marks the last page
//! - `PATCH /{base}/{table}` with `{records: [{id, fields: {flag: true}}]}` updates at most
//!   [`MAX_RECORDS_PER_REQUEST`] records
//!
//! The engine depends only on the [`ExternalSource`] trait. [`AirtableClient`] is the
//! HTTP implementation; [`MemorySource`] serves fixed records for tests and demos.

mod client;
mod memory;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sync_core::ExternalRecord;

pub use client::{AirtableClient, AirtableConfig, DEFAULT_API_URL};
pub use memory::MemorySource;

/// Largest page the source will return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Largest number of records a single write-back request may carry.
pub const MAX_RECORDS_PER_REQUEST: usize = 10;

/// Parameters of one page fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: usize,
    /// Continuation cursor from the previous page; empty for the first page
    pub offset: String,
    /// Server-side filter expression
    pub filter_formula: Option<String>,
}

impl PageRequest {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset: impl Into<String>) -> Self {
        self.offset = offset.into();
        self
    }

    pub fn with_filter(mut self, formula: Option<String>) -> Self {
        self.filter_formula = formula;
        self
    }
}

/// One page of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub records: Vec<ExternalRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

impl Page {
    /// Cursor for the next page; empty when this is the last page.
    pub fn next_cursor(&self) -> String {
        self.offset.clone().unwrap_or_default()
    }
}

/// Filter that selects records whose synced flag is not set.
pub fn unsynced_formula(synced_field: &str) -> String {
    format!("NOT({{{synced_field}}})")
}

/// Read and acknowledge records in the external source.
#[async_trait::async_trait]
pub trait ExternalSource: Send + Sync {
    /// Fetch one page of records.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page>;

    /// Set the boolean `synced_field` on up to [`MAX_RECORDS_PER_REQUEST`] records.
    async fn mark_synced(&self, record_ids: &[String], synced_field: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps_size() {
        assert_eq!(PageRequest::new(500).page_size, MAX_PAGE_SIZE);
        assert_eq!(PageRequest::new(0).page_size, 1);
    }

    #[test]
    fn test_unsynced_formula() {
        assert_eq!(unsynced_formula("Synced"), "NOT({Synced})");
    }

    #[test]
    fn test_page_decodes_without_offset() {
        let page: Page = serde_json::from_str(
            r#"{"records":[{"id":"rec00000000000001","fields":{"Name":"A"}}]}"#,
        )
        .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_cursor(), "");
    }
}
