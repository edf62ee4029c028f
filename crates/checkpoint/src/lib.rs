//! Run state management for lead-sync
//!
//! A sync run is driven one chunk at a time by an external scheduler, so the
//! state that ties chunks together has to outlive each invocation. This crate
//! provides:
//!
//! - [`SyncRunState`] - cursor, cumulative counters and [`RunPhase`] of the run in progress
//! - [`LastRunSummary`] - permanent record of the last completed run
//! - [`RunStateStore`] - storage trait with typed load/save helpers and a run lease
//! - [`RunLease`] - time-limited exclusive claim on the sync engine
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - JSON files in a directory
//! - `MemoryStore` - process-local, used by tests and dry runs
//! - The PostgreSQL options table (implemented in the `lead-store` crate)

mod filesystem;
mod memory;
mod phase;
mod state;
pub mod store;

#[cfg(test)]
mod tests;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use phase::RunPhase;
pub use state::{LastRunSummary, SyncRunState};
pub use store::{RunLease, RunStateStore, LAST_RUN_KEY, LEASE_NAME, RUN_STATE_KEY};
