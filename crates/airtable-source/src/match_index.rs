//! Match index: classify incoming records as insert or update.

use anyhow::Result;
use lead_store::{ExistingLead, LeadStore};
use std::collections::HashMap;

/// How one incoming record is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No existing lead; insert a new one
    Insert,
    /// Update an existing lead
    Update {
        lead_id: i64,
        /// Matched by email only; the lead takes over the external id
        claim_external_id: bool,
    },
}

/// Existing leads keyed by external id (strong) and lowercased email (weak).
#[derive(Debug, Default)]
pub struct MatchIndex {
    by_external_id: HashMap<String, i64>,
    by_email: HashMap<String, ExistingLead>,
}

impl MatchIndex {
    /// Query every lead matching the batch's emails or external ids in one round trip.
    pub async fn build(
        store: &dyn LeadStore,
        emails: &[String],
        external_ids: &[String],
    ) -> Result<Self> {
        if emails.is_empty() && external_ids.is_empty() {
            return Ok(Self::default());
        }
        let leads = store.find_matching_leads(emails, external_ids).await?;
        Ok(Self::from_leads(leads))
    }

    pub fn from_leads(leads: Vec<ExistingLead>) -> Self {
        let mut index = Self::default();
        for lead in leads {
            if let Some(external_id) = &lead.external_id {
                index.by_external_id.insert(external_id.clone(), lead.id);
            }
            let Some(email) = lead.email.as_deref().map(|e| e.trim().to_lowercase()) else {
                continue;
            };
            if email.is_empty() {
                continue;
            }
            // Prefer a lead that can still take an external id, then the oldest
            let replace = match index.by_email.get(&email) {
                None => true,
                Some(current) => match (&current.external_id, &lead.external_id) {
                    (Some(_), None) => true,
                    (None, Some(_)) => false,
                    _ => lead.id < current.id,
                },
            };
            if replace {
                index.by_email.insert(email, lead);
            }
        }
        index
    }

    /// Classify one record.
    ///
    /// An external id match always wins. An email match updates the lead only
    /// when it has no external id yet; a lead bound to a different external
    /// record is never overwritten.
    pub fn classify(&self, external_id: &str, email: Option<&str>) -> MatchOutcome {
        if let Some(id) = self.by_external_id.get(external_id) {
            return MatchOutcome::Update {
                lead_id: *id,
                claim_external_id: false,
            };
        }
        let Some(email) = email.map(|e| e.trim().to_lowercase()) else {
            return MatchOutcome::Insert;
        };
        match self.by_email.get(&email) {
            Some(lead) if lead.external_id.is_none() => MatchOutcome::Update {
                lead_id: lead.id,
                claim_external_id: true,
            },
            _ => MatchOutcome::Insert,
        }
    }
}
