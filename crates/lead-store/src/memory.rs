//! In-memory implementation of [`LeadStore`].
//!
//! Mirrors the PostgreSQL semantics the engine relies on: a unique external
//! id per lead, case-insensitive email and dimension-name matching, and a
//! multi-row insert that succeeds or fails as a whole. Call counters let
//! tests assert on round trips.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use sync_core::{DimensionKind, FieldValue, LEAD_COLUMNS};

use crate::types::column_value;
use crate::{DimensionRow, ExistingLead, LeadRow, LeadStore, NewDimension};

/// A lead as held by [`MemoryLeadStore`], with every column populated.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLead {
    pub id: i64,
    pub values: BTreeMap<String, FieldValue>,
    pub foreign_keys: BTreeMap<DimensionKind, i64>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredLead {
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.values.get(column)
    }

    pub fn email(&self) -> Option<&str> {
        self.get("email").and_then(FieldValue::as_str)
    }
}

/// Round trips issued against the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub list_dimension_calls: usize,
    pub find_dimension_calls: usize,
    pub insert_dimension_calls: usize,
    pub match_queries: usize,
    pub insert_statements: usize,
    pub update_calls: usize,
}

#[derive(Default)]
struct Inner {
    leads: Vec<StoredLead>,
    dimensions: HashMap<DimensionKind, Vec<DimensionRow>>,
    field_mapping: Option<String>,
    next_id: i64,
    stats: StoreStats,
    failing_emails: HashSet<String>,
    failing_dimensions: HashSet<DimensionKind>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn external_id_taken(&self, external_id: &str, except: Option<i64>) -> bool {
        self.leads
            .iter()
            .any(|l| l.external_id.as_deref() == Some(external_id) && Some(l.id) != except)
    }

    fn check_failure(&self, row: &LeadRow) -> Result<()> {
        if let Some(email) = row.email() {
            if self.failing_emails.contains(&email.to_lowercase()) {
                anyhow::bail!("simulated write failure for {email}");
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLeadStore {
    inner: Mutex<Inner>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory lead store lock poisoned"))
    }

    /// Seed an existing lead. Returns its id.
    pub fn seed_lead(&self, email: Option<&str>, external_id: Option<&str>) -> i64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id();
        let mut values = BTreeMap::new();
        for col in LEAD_COLUMNS {
            values.insert(col.name.to_string(), column_value(col, None));
        }
        if let Some(email) = email {
            values.insert("email".to_string(), FieldValue::Text(email.to_string()));
        }
        let now = Utc::now();
        inner.leads.push(StoredLead {
            id,
            values,
            foreign_keys: BTreeMap::new(),
            external_id: external_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        });
        id
    }

    /// Seed an existing dimension row. Returns its id.
    pub fn seed_dimension(
        &self,
        kind: DimensionKind,
        name: &str,
        name_secondary: Option<&str>,
        code: Option<&str>,
    ) -> i64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id();
        inner.dimensions.entry(kind).or_default().push(DimensionRow {
            id,
            name: name.to_string(),
            name_secondary: name_secondary.map(str::to_string),
            code: code.map(str::to_string),
        });
        id
    }

    /// Make every insert or update touching this email fail.
    pub fn fail_writes_for_email(&self, email: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failing_emails.insert(email.to_lowercase());
    }

    /// Make creation of this dimension kind fail.
    pub fn fail_dimension_inserts(&self, kind: DimensionKind) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failing_dimensions.insert(kind);
    }

    pub fn leads(&self) -> Vec<StoredLead> {
        self.inner
            .lock()
            .map(|i| i.leads.clone())
            .unwrap_or_default()
    }

    pub fn lead_by_external_id(&self, external_id: &str) -> Option<StoredLead> {
        self.leads()
            .into_iter()
            .find(|l| l.external_id.as_deref() == Some(external_id))
    }

    pub fn lead(&self, id: i64) -> Option<StoredLead> {
        self.leads().into_iter().find(|l| l.id == id)
    }

    pub fn dimensions(&self, kind: DimensionKind) -> Vec<DimensionRow> {
        self.inner
            .lock()
            .map(|i| i.dimensions.get(&kind).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.lock().map(|i| i.stats).unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.stats = StoreStats::default();
        }
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn list_dimensions(&self, kind: DimensionKind) -> Result<Vec<DimensionRow>> {
        let mut inner = self.lock()?;
        inner.stats.list_dimension_calls += 1;
        Ok(inner.dimensions.get(&kind).cloned().unwrap_or_default())
    }

    async fn find_dimension(&self, kind: DimensionKind, name: &str) -> Result<Option<i64>> {
        let mut inner = self.lock()?;
        inner.stats.find_dimension_calls += 1;
        let needle = name.to_lowercase();
        Ok(inner.dimensions.get(&kind).and_then(|rows| {
            rows.iter()
                .find(|row| {
                    row.name.to_lowercase() == needle
                        || (kind.is_bilingual()
                            && row
                                .name_secondary
                                .as_ref()
                                .map(|s| s.to_lowercase() == needle)
                                .unwrap_or(false))
                })
                .map(|row| row.id)
        }))
    }

    async fn dimension_code_exists(&self, kind: DimensionKind, code: &str) -> Result<bool> {
        let inner = self.lock()?;
        Ok(inner
            .dimensions
            .get(&kind)
            .map(|rows| rows.iter().any(|r| r.code.as_deref() == Some(code)))
            .unwrap_or(false))
    }

    async fn insert_dimension(&self, kind: DimensionKind, row: &NewDimension) -> Result<i64> {
        let mut inner = self.lock()?;
        inner.stats.insert_dimension_calls += 1;
        if inner.failing_dimensions.contains(&kind) {
            anyhow::bail!("simulated failure creating {kind} '{}'", row.name);
        }
        if let Some(code) = &row.code {
            let taken = inner
                .dimensions
                .get(&kind)
                .map(|rows| rows.iter().any(|r| r.code.as_ref() == Some(code)))
                .unwrap_or(false);
            if taken {
                anyhow::bail!("duplicate {kind} code '{code}'");
            }
        }
        let id = inner.next_id();
        inner.dimensions.entry(kind).or_default().push(DimensionRow {
            id,
            name: row.name.clone(),
            name_secondary: None,
            code: row.code.clone(),
        });
        Ok(id)
    }

    async fn find_matching_leads(
        &self,
        emails: &[String],
        external_ids: &[String],
    ) -> Result<Vec<ExistingLead>> {
        let mut inner = self.lock()?;
        inner.stats.match_queries += 1;
        let emails: HashSet<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let external_ids: HashSet<&String> = external_ids.iter().collect();
        Ok(inner
            .leads
            .iter()
            .filter(|lead| {
                lead.email()
                    .map(|e| emails.contains(&e.to_lowercase()))
                    .unwrap_or(false)
                    || lead
                        .external_id
                        .as_ref()
                        .map(|x| external_ids.contains(x))
                        .unwrap_or(false)
            })
            .map(|lead| ExistingLead {
                id: lead.id,
                email: lead.email().map(str::to_string),
                external_id: lead.external_id.clone(),
            })
            .collect())
    }

    async fn insert_leads(&self, rows: &[LeadRow]) -> Result<u64> {
        let mut inner = self.lock()?;
        inner.stats.insert_statements += 1;

        // The statement is atomic: validate every row before writing any
        let mut batch_ids = HashSet::new();
        for row in rows {
            inner.check_failure(row)?;
            if inner.external_id_taken(&row.external_id, None)
                || !batch_ids.insert(row.external_id.as_str())
            {
                anyhow::bail!("duplicate external_id '{}'", row.external_id);
            }
        }

        for row in rows {
            let id = inner.next_id();
            let values = LEAD_COLUMNS
                .iter()
                .map(|col| (col.name.to_string(), column_value(col, row.values.get(col.name))))
                .collect();
            inner.leads.push(StoredLead {
                id,
                values,
                foreign_keys: row.foreign_keys.clone(),
                external_id: Some(row.external_id.clone()),
                created_at: row.written_at,
                updated_at: row.written_at,
            });
        }
        Ok(rows.len() as u64)
    }

    async fn update_lead(&self, id: i64, row: &LeadRow, claim_external_id: bool) -> Result<()> {
        let mut inner = self.lock()?;
        inner.stats.update_calls += 1;
        inner.check_failure(row)?;
        if claim_external_id && inner.external_id_taken(&row.external_id, Some(id)) {
            anyhow::bail!("duplicate external_id '{}'", row.external_id);
        }
        let lead = inner
            .leads
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| anyhow::anyhow!("lead {id} not found"))?;
        for (col, value) in row.mapped_columns() {
            lead.values
                .insert(col.name.to_string(), column_value(col, Some(value)));
        }
        for (kind, fk) in &row.foreign_keys {
            lead.foreign_keys.insert(*kind, *fk);
        }
        if claim_external_id {
            lead.external_id = Some(row.external_id.clone());
        }
        lead.updated_at = row.written_at;
        Ok(())
    }

    async fn load_field_mapping(&self) -> Result<Option<String>> {
        Ok(self.lock()?.field_mapping.clone())
    }

    async fn save_field_mapping(&self, stored: &str) -> Result<()> {
        self.lock()?.field_mapping = Some(stored.to_string());
        Ok(())
    }
}
