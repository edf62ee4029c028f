//! PostgreSQL implementation of [`LeadStore`] and [`RunStateStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use checkpoint::{RunLease, RunStateStore, LEASE_NAME};
use chrono::{DateTime, Utc};
use sync_core::{DimensionKind, FieldValue, ValueKind};
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tracing::{debug, info};

use crate::types::{column_value, insert_cells, InsertCell, INSERT_COLUMNS};
use crate::{DimensionRow, ExistingLead, LeadRow, LeadStore, NewDimension, FIELD_MAPPING_KEY};

/// Rows per INSERT statement; keeps bind parameters well under PostgreSQL's 65535 limit.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

type Param = Box<dyn ToSql + Sync + Send>;

pub struct PgLeadStore {
    client: Client,
}

impl PgLeadStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(connection_string: &str) -> Result<Self> {
        Ok(Self::new(crate::new_postgresql_client(connection_string).await?))
    }

    /// Create all tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in crate::schema::ddl_statements() {
            self.client
                .batch_execute(&statement)
                .await
                .with_context(|| format!("Failed to apply DDL: {statement}"))?;
        }
        info!("Lead schema is up to date");
        Ok(())
    }

    fn params_ref(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
        params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect()
    }
}

/// `INSERT INTO leads (...) VALUES ($1, ...), (...)` for `rows` rows.
pub(crate) fn build_insert_sql(rows: usize) -> String {
    let width = INSERT_COLUMNS.len();
    let columns: Vec<&str> = INSERT_COLUMNS.iter().map(|c| c.name()).collect();
    let tuples: Vec<String> = (0..rows)
        .map(|r| {
            let placeholders: Vec<String> =
                (1..=width).map(|c| format!("${}", r * width + c)).collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO leads ({}) VALUES {}",
        columns.join(", "),
        tuples.join(", ")
    )
}

/// `UPDATE leads SET ... WHERE id = $n` for the given column names.
///
/// `updated_at` is always appended; the id is the last parameter.
pub(crate) fn build_update_sql(columns: &[&str]) -> String {
    let mut sets: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ${}", i + 1))
        .collect();
    sets.push(format!("updated_at = ${}", columns.len() + 1));
    format!(
        "UPDATE leads SET {} WHERE id = ${}",
        sets.join(", "),
        columns.len() + 2
    )
}

fn value_param(kind: ValueKind, value: FieldValue) -> Param {
    match (kind, value) {
        (ValueKind::Text, FieldValue::Text(s)) => Box::new(Some(s)),
        (ValueKind::Integer, FieldValue::Integer(i)) => Box::new(Some(i)),
        (ValueKind::Json, FieldValue::Json(v)) => Box::new(Some(v)),
        (ValueKind::Text, _) => Box::new(None::<String>),
        (ValueKind::Integer, _) => Box::new(None::<i64>),
        (ValueKind::Json, _) => Box::new(None::<serde_json::Value>),
    }
}

fn row_params(row: &LeadRow, params: &mut Vec<Param>) {
    for (column, cell) in INSERT_COLUMNS.iter().zip(insert_cells(row)) {
        let param: Param = match (column, cell) {
            (crate::InsertColumn::Scalar(col), InsertCell::Value(v)) => value_param(col.kind, v),
            (_, InsertCell::Value(v)) => value_param(ValueKind::Text, v),
            (_, InsertCell::ForeignKey(id)) => Box::new(id),
            (_, InsertCell::Timestamp(ts)) => Box::new(ts),
        };
        params.push(param);
    }
}

fn dimension_lookup_sql(kind: DimensionKind) -> String {
    let table = kind.table_name();
    if kind.is_bilingual() {
        format!(
            "SELECT id FROM {table} WHERE lower(name) = lower($1) OR lower(name_secondary) = lower($1) ORDER BY id LIMIT 1"
        )
    } else {
        format!("SELECT id FROM {table} WHERE lower(name) = lower($1) ORDER BY id LIMIT 1")
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn list_dimensions(&self, kind: DimensionKind) -> Result<Vec<DimensionRow>> {
        let sql = format!(
            "SELECT id, name, name_secondary, code FROM {} ORDER BY id",
            kind.table_name()
        );
        let rows = self
            .client
            .query(&sql, &[])
            .await
            .with_context(|| format!("Failed to list {}", kind.table_name()))?;
        Ok(rows
            .iter()
            .map(|row| DimensionRow {
                id: row.get(0),
                name: row.get(1),
                name_secondary: row.get(2),
                code: row.get(3),
            })
            .collect())
    }

    async fn find_dimension(&self, kind: DimensionKind, name: &str) -> Result<Option<i64>> {
        let row = self
            .client
            .query_opt(&dimension_lookup_sql(kind), &[&name])
            .await
            .with_context(|| format!("Failed to look up {kind} '{name}'"))?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn dimension_code_exists(&self, kind: DimensionKind, code: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE code = $1", kind.table_name());
        let row = self.client.query_opt(&sql, &[&code]).await?;
        Ok(row.is_some())
    }

    async fn insert_dimension(&self, kind: DimensionKind, row: &NewDimension) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} (name, code, is_active, notes, created_at, updated_at)
             VALUES ($1, $2, TRUE, $3, now(), now()) RETURNING id",
            kind.table_name()
        );
        let inserted = self
            .client
            .query_one(&sql, &[&row.name, &row.code, &row.notes])
            .await
            .with_context(|| format!("Failed to create {kind} '{}'", row.name))?;
        Ok(inserted.get(0))
    }

    async fn find_matching_leads(
        &self,
        emails: &[String],
        external_ids: &[String],
    ) -> Result<Vec<ExistingLead>> {
        if emails.is_empty() && external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let emails: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let external_ids = external_ids.to_vec();
        let rows = self
            .client
            .query(
                "SELECT id, email, external_id FROM leads
                 WHERE lower(email) = ANY($1) OR external_id = ANY($2)",
                &[&emails, &external_ids],
            )
            .await
            .context("Failed to query matching leads")?;
        Ok(rows
            .iter()
            .map(|row| ExistingLead {
                id: row.get(0),
                email: row.get(1),
                external_id: row.get(2),
            })
            .collect())
    }

    async fn insert_leads(&self, rows: &[LeadRow]) -> Result<u64> {
        let mut written = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = build_insert_sql(chunk.len());
            let mut params: Vec<Param> = Vec::with_capacity(chunk.len() * INSERT_COLUMNS.len());
            for row in chunk {
                row_params(row, &mut params);
            }
            written += self
                .client
                .execute(&sql, &Self::params_ref(&params))
                .await
                .with_context(|| format!("Failed to insert {} leads", chunk.len()))?;
        }
        debug!("Inserted {written} leads");
        Ok(written)
    }

    async fn update_lead(&self, id: i64, row: &LeadRow, claim_external_id: bool) -> Result<()> {
        let mut columns: Vec<&str> = Vec::new();
        let mut params: Vec<Param> = Vec::new();
        for (col, value) in row.mapped_columns() {
            columns.push(col.name);
            params.push(value_param(col.kind, column_value(col, Some(value))));
        }
        for (kind, fk) in &row.foreign_keys {
            columns.push(kind.foreign_key());
            params.push(Box::new(*fk));
        }
        if claim_external_id {
            columns.push("external_id");
            params.push(Box::new(row.external_id.clone()));
        }
        params.push(Box::new(row.written_at));
        params.push(Box::new(id));

        let sql = build_update_sql(&columns);
        self.client
            .execute(&sql, &Self::params_ref(&params))
            .await
            .with_context(|| format!("Failed to update lead {id}"))?;
        Ok(())
    }

    async fn load_field_mapping(&self) -> Result<Option<String>> {
        self.get_value(FIELD_MAPPING_KEY).await
    }

    async fn save_field_mapping(&self, stored: &str) -> Result<()> {
        self.put_value(FIELD_MAPPING_KEY, stored.to_string()).await
    }
}

#[async_trait]
impl RunStateStore for PgLeadStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let row = self
            .client
            .query_opt("SELECT value FROM sync_options WHERE name = $1", &[&key])
            .await
            .with_context(|| format!("Failed to read option {key}"))?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn put_value(&self, key: &str, value: String) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO sync_options (name, value, updated_at) VALUES ($1, $2, now())
                 ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
                &[&key, &value],
            )
            .await
            .with_context(|| format!("Failed to write option {key}"))?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<()> {
        self.client
            .execute("DELETE FROM sync_options WHERE name = $1", &[&key])
            .await?;
        Ok(())
    }

    async fn try_acquire_lease(&self, lease: &RunLease) -> Result<bool> {
        let acquired_at: DateTime<Utc> = lease.acquired_at;
        let row = self
            .client
            .query_opt(
                "INSERT INTO sync_lease (name, owner, acquired_at, expires_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (name) DO UPDATE
                   SET owner = EXCLUDED.owner,
                       acquired_at = EXCLUDED.acquired_at,
                       expires_at = EXCLUDED.expires_at
                   WHERE sync_lease.owner = EXCLUDED.owner
                      OR sync_lease.expires_at <= EXCLUDED.acquired_at
                 RETURNING owner",
                &[&LEASE_NAME, &lease.owner, &acquired_at, &lease.expires_at],
            )
            .await
            .context("Failed to acquire sync lease")?;
        Ok(row.is_some())
    }

    async fn release_lease(&self, owner: &str) -> Result<()> {
        self.client
            .execute(
                "DELETE FROM sync_lease WHERE name = $1 AND owner = $2",
                &[&LEASE_NAME, &owner],
            )
            .await?;
        Ok(())
    }
}
