//! Counters reported per chunk and accumulated across a run.

use crate::types::DimensionKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    /// External records fetched and run through the mapper
    pub processed: u64,
    /// Leads inserted
    pub created: u64,
    /// Leads updated
    pub updated: u64,
    /// Records skipped because of a mapping or write error
    pub failed: u64,
    /// Records acknowledged to the external source
    pub marked: u64,
    pub countries_created: u64,
    pub campaigns_created: u64,
    pub campaign_groups_created: u64,
    pub sources_created: u64,
}

impl SyncCounters {
    /// Add another set of counters into this one.
    pub fn merge(&mut self, other: &SyncCounters) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.failed += other.failed;
        self.marked += other.marked;
        self.countries_created += other.countries_created;
        self.campaigns_created += other.campaigns_created;
        self.campaign_groups_created += other.campaign_groups_created;
        self.sources_created += other.sources_created;
    }

    pub fn record_dimension_created(&mut self, kind: DimensionKind) {
        *self.dimension_created_mut(kind) += 1;
    }

    pub fn dimension_created(&self, kind: DimensionKind) -> u64 {
        match kind {
            DimensionKind::Country => self.countries_created,
            DimensionKind::Campaign => self.campaigns_created,
            DimensionKind::CampaignGroup => self.campaign_groups_created,
            DimensionKind::Source => self.sources_created,
        }
    }

    fn dimension_created_mut(&mut self, kind: DimensionKind) -> &mut u64 {
        match kind {
            DimensionKind::Country => &mut self.countries_created,
            DimensionKind::Campaign => &mut self.campaigns_created,
            DimensionKind::CampaignGroup => &mut self.campaign_groups_created,
            DimensionKind::Source => &mut self.sources_created,
        }
    }
}
