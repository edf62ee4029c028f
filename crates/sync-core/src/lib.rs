//! Core types for the lead-sync engine.
//!
//! This crate provides the foundational, I/O-free types shared by every
//! other crate in the workspace:
//!
//! - [`ExternalRecord`] - One row as returned by the external tabular source
//! - [`FieldValue`] - A sanitized value ready to be written to a lead column
//! - [`MappedRecord`] - The output of the field mapper for one external record
//! - [`FieldMapping`] / [`FieldMappings`] - The user-edited mapping configuration
//! - [`LeadColumn`] / [`DimensionKind`] - The closed catalogue of write targets
//! - [`SyncCounters`] - Counters carried across chunk invocations
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint       (persists SyncCounters inside SyncRunState)
//!    ├─── lead-store       (writes FieldValue into lead/dimension tables)
//!    ├─── airtable         (decodes ExternalRecord pages)
//!    └─── airtable-source  (maps, resolves, matches and writes records)
//! ```

pub mod counters;
pub mod schema;
pub mod types;
pub mod values;

pub use counters::SyncCounters;
pub use schema::{FieldMapping, FieldMappings, MappingError, ParsedMappings};
pub use types::{
    destination_for, lead_column, ColumnDefault, Destination, DimensionKind, LeadColumn,
    ValueKind, LEAD_COLUMNS,
};
pub use values::{
    is_record_reference, ExternalRecord, FieldValue, MappedRecord, StagedDimension,
};
