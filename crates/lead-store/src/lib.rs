//! Local relational storage for synchronized leads
//!
//! The sync engine only talks to storage through the [`LeadStore`] trait:
//!
//! - Dimension rows (country, campaign, campaign group, source): prefetch, lookup by name, create
//! - Lead matching: one query per batch by email and external id
//! - Lead writes: one multi-row insert per batch, one update per matched lead
//! - The stored field mapping text
//!
//! Two implementations are provided:
//!
//! - [`PgLeadStore`] - PostgreSQL via tokio-postgres; also implements
//!   [`checkpoint::RunStateStore`] on top of the `sync_options` table
//! - [`MemoryLeadStore`] - process-local, used by tests and dry runs

mod client;
mod memory;
mod postgres;
pub mod schema;
mod types;

pub use client::new_postgresql_client;
pub use memory::{MemoryLeadStore, StoreStats, StoredLead};
pub use postgres::PgLeadStore;
pub use types::{
    column_value, insert_cells, DimensionRow, ExistingLead, InsertCell, InsertColumn, LeadRow,
    NewDimension, INSERT_COLUMNS,
};

use anyhow::Result;
use sync_core::DimensionKind;

/// Option key holding the serialized field mapping.
pub const FIELD_MAPPING_KEY: &str = "field_mapping";

/// Storage operations used by the sync engine.
///
/// Every method is a single round trip for the PostgreSQL implementation.
#[async_trait::async_trait]
pub trait LeadStore: Send + Sync {
    /// All rows of one dimension kind, used to prime the resolver cache.
    async fn list_dimensions(&self, kind: DimensionKind) -> Result<Vec<DimensionRow>>;

    /// Find a dimension row by name, case-insensitively.
    ///
    /// Bilingual kinds also match the secondary-language name.
    async fn find_dimension(&self, kind: DimensionKind, name: &str) -> Result<Option<i64>>;

    /// Whether a generated short code is already taken.
    async fn dimension_code_exists(&self, kind: DimensionKind, code: &str) -> Result<bool>;

    /// Create a dimension row and return its id.
    async fn insert_dimension(&self, kind: DimensionKind, row: &NewDimension) -> Result<i64>;

    /// Leads whose email (case-insensitive) or external id is in the given sets.
    async fn find_matching_leads(
        &self,
        emails: &[String],
        external_ids: &[String],
    ) -> Result<Vec<ExistingLead>>;

    /// Insert new leads with as few statements as possible. Returns rows written.
    async fn insert_leads(&self, rows: &[LeadRow]) -> Result<u64>;

    /// Update the mapped columns of one lead.
    ///
    /// When `claim_external_id` is set the lead's external id is set to the row's.
    async fn update_lead(&self, id: i64, row: &LeadRow, claim_external_id: bool) -> Result<()>;

    /// Raw stored field mapping text, if configured.
    async fn load_field_mapping(&self) -> Result<Option<String>>;

    /// Replace the stored field mapping text.
    async fn save_field_mapping(&self, stored: &str) -> Result<()>;
}
