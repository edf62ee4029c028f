//! Lead synchronization from the external tabular source
//!
//! Reconciles records of the external source with local leads:
//!
//! ```text
//! LeadSync (full / chunk / test)
//!    │
//!    └── PaginationController ── one page per step, run state persisted
//!          │
//!          ├── map_record        raw fields -> typed lead values, staged dimension names
//!          ├── EntityResolver    dimension names -> ids (find or create, per-run cache)
//!          ├── MatchIndex        insert vs update (external id first, then email)
//!          ├── BatchWriter       one multi-row insert, one update per matched lead
//!          └── WriteBackMarker   smart sync only: flag written records as synced
//! ```
//!
//! Each invocation takes a time-limited lease, so overlapping triggers fail
//! fast instead of double-counting the run's counters.

pub mod controller;
pub mod mapper;
pub mod marker;
pub mod match_index;
pub mod resolver;
mod sync;
pub mod writer;

pub use controller::{ChunkResult, PaginationController};
pub use mapper::map_record;
pub use marker::{MarkOutcome, WriteBackMarker};
pub use match_index::{MatchIndex, MatchOutcome};
pub use resolver::{initials, DimensionCache, EntityResolver, Resolved};
pub use sync::{load_status, Config, LeadSync, SyncReport, SyncStatus, TestSyncReport};
pub use writer::{BatchWriter, WriteOutcome};
