//! Row types exchanged between the engine and storage.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use sync_core::{ColumnDefault, DimensionKind, FieldValue, LeadColumn, ValueKind, LEAD_COLUMNS};

/// An existing dimension row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionRow {
    pub id: i64,
    pub name: String,
    /// Secondary-language name, bilingual kinds only
    pub name_secondary: Option<String>,
    pub code: Option<String>,
}

/// A dimension row about to be created by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDimension {
    pub name: String,
    pub code: Option<String>,
    pub notes: String,
}

/// The matching keys of an existing lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingLead {
    pub id: i64,
    pub email: Option<String>,
    pub external_id: Option<String>,
}

/// A lead prepared for writing.
///
/// `values` and `foreign_keys` hold only what the mapping produced; the
/// update path writes exactly these, the insert path fills the rest of
/// [`INSERT_COLUMNS`] with column defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadRow {
    pub external_id: String,
    pub values: BTreeMap<String, FieldValue>,
    pub foreign_keys: BTreeMap<DimensionKind, i64>,
    pub written_at: DateTime<Utc>,
}

impl LeadRow {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            values: BTreeMap::new(),
            foreign_keys: BTreeMap::new(),
            written_at: Utc::now(),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.values.get("email").and_then(FieldValue::as_str)
    }

    /// Scalar columns this row sets, in catalogue order.
    pub fn mapped_columns(&self) -> impl Iterator<Item = (&'static LeadColumn, &FieldValue)> {
        LEAD_COLUMNS
            .iter()
            .filter_map(|col| self.values.get(col.name).map(|v| (col, v)))
    }
}

/// One column of the bulk insert statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertColumn {
    Scalar(&'static LeadColumn),
    ForeignKey(DimensionKind),
    ExternalId,
    CreatedAt,
    UpdatedAt,
}

impl InsertColumn {
    pub fn name(&self) -> &'static str {
        match self {
            InsertColumn::Scalar(col) => col.name,
            InsertColumn::ForeignKey(kind) => kind.foreign_key(),
            InsertColumn::ExternalId => "external_id",
            InsertColumn::CreatedAt => "created_at",
            InsertColumn::UpdatedAt => "updated_at",
        }
    }
}

/// The fixed superset of columns written by every bulk insert.
pub static INSERT_COLUMNS: std::sync::LazyLock<Vec<InsertColumn>> =
    std::sync::LazyLock::new(|| {
        let mut columns: Vec<InsertColumn> =
            LEAD_COLUMNS.iter().map(InsertColumn::Scalar).collect();
        columns.extend(DimensionKind::ALL.into_iter().map(InsertColumn::ForeignKey));
        columns.extend([
            InsertColumn::ExternalId,
            InsertColumn::CreatedAt,
            InsertColumn::UpdatedAt,
        ]);
        columns
    });

/// Coerce a value to a column's kind, falling back to the column default.
pub fn column_value(column: &LeadColumn, value: Option<&FieldValue>) -> FieldValue {
    let coerced = match (column.kind, value) {
        (_, None) | (_, Some(FieldValue::Null)) => None,
        (ValueKind::Text, Some(FieldValue::Text(s))) => Some(FieldValue::Text(s.clone())),
        (ValueKind::Text, Some(FieldValue::Integer(i))) => Some(FieldValue::Text(i.to_string())),
        (ValueKind::Text, Some(FieldValue::Json(v))) => Some(FieldValue::Text(v.to_string())),
        (ValueKind::Integer, Some(FieldValue::Integer(i))) => Some(FieldValue::Integer(*i)),
        (ValueKind::Integer, Some(FieldValue::Text(s))) => {
            s.trim().parse::<i64>().ok().map(FieldValue::Integer)
        }
        (ValueKind::Integer, Some(FieldValue::Json(v))) => v.as_i64().map(FieldValue::Integer),
        (ValueKind::Json, Some(v)) => Some(FieldValue::Json(v.to_json())),
    };
    coerced.unwrap_or(match column.default {
        ColumnDefault::Null => FieldValue::Null,
        ColumnDefault::Text(s) => FieldValue::Text(s.to_string()),
        ColumnDefault::Integer(i) => FieldValue::Integer(i),
    })
}

/// A single cell of a bulk insert row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertCell {
    Value(FieldValue),
    ForeignKey(Option<i64>),
    Timestamp(DateTime<Utc>),
}

/// Expand a row to the full [`INSERT_COLUMNS`] width.
pub fn insert_cells(row: &LeadRow) -> Vec<InsertCell> {
    INSERT_COLUMNS
        .iter()
        .map(|column| match column {
            InsertColumn::Scalar(col) => InsertCell::Value(column_value(col, row.values.get(col.name))),
            InsertColumn::ForeignKey(kind) => {
                InsertCell::ForeignKey(row.foreign_keys.get(kind).copied())
            }
            InsertColumn::ExternalId => {
                InsertCell::Value(FieldValue::Text(row.external_id.clone()))
            }
            InsertColumn::CreatedAt | InsertColumn::UpdatedAt => {
                InsertCell::Timestamp(row.written_at)
            }
        })
        .collect()
}
