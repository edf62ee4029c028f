//! Record and value representations.
//!
//! [`ExternalRecord`] is the raw shape returned by the external source and is
//! never stored verbatim. [`MappedRecord`] is the flat, sanitized shape
//! produced by the field mapper, with dimension references staged for the
//! entity resolver.

use crate::schema::MappingError;
use crate::types::DimensionKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of the external source's internal record identifiers.
const RECORD_REFERENCE_PREFIX: &str = "rec";

/// Total length of an internal record identifier (`rec` + 14 alphanumerics).
const RECORD_REFERENCE_LEN: usize = 17;

/// Whether a string has the shape of an unresolved linked-record reference.
pub fn is_record_reference(value: &str) -> bool {
    value.len() == RECORD_REFERENCE_LEN
        && value.starts_with(RECORD_REFERENCE_PREFIX)
        && value[RECORD_REFERENCE_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
}

// ============================================================================
// External records
// ============================================================================

/// One record as returned by the external tabular source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    /// Stable identifier assigned by the external source
    pub id: String,

    /// Raw field values keyed by external field name
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,

    /// Creation time reported by the source, if any
    #[serde(rename = "createdTime", default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
}

impl ExternalRecord {
    pub fn new(id: impl Into<String>, fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            fields,
            created_time: None,
        }
    }

    /// Whether the record already carries a truthy synced flag.
    pub fn is_synced(&self, synced_field: &str) -> bool {
        matches!(self.fields.get(synced_field), Some(serde_json::Value::Bool(true)))
    }
}

// ============================================================================
// Field values
// ============================================================================

/// A sanitized value ready to be written to a lead column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Text(String),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// A value counts as present when it is non-null and, for text, non-empty.
    pub fn is_present(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Text(s) => !s.is_empty(),
            FieldValue::Integer(_) | FieldValue::Json(_) => true,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Integer(i) => serde_json::Value::from(*i),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Json(v) => v.clone(),
        }
    }
}

// ============================================================================
// Mapped records
// ============================================================================

/// A dimension name staged by the mapper for later resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedDimension {
    pub name: String,
    /// Whether the resolver may create the row when it does not exist
    pub auto_create: bool,
}

/// Output of the field mapper for one external record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    /// Identifier of the originating external record
    pub external_id: String,

    /// Sanitized scalar values keyed by lead column name
    pub values: BTreeMap<String, FieldValue>,

    /// Dimension names awaiting resolution
    pub staged: BTreeMap<DimensionKind, StagedDimension>,

    /// Fields skipped while mapping this record
    pub diagnostics: Vec<MappingError>,
}

impl MappedRecord {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.values.get(column)
    }

    /// Email used for weak matching, already normalized by the mapper.
    pub fn email(&self) -> Option<&str> {
        self.values
            .get("email")
            .and_then(FieldValue::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Whether the column or staged dimension behind an internal field has a value.
    pub fn has(&self, internal_field: &str) -> bool {
        if let Some(kind) = DimensionKind::from_internal_field(internal_field) {
            return self.staged.contains_key(&kind);
        }
        self.values
            .get(internal_field)
            .map(FieldValue::is_present)
            .unwrap_or(false)
    }

    /// Flatten into a JSON object, with staged dimensions under their `*_name` pseudo-keys.
    pub fn to_flat_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        for (kind, staged) in &self.staged {
            map.insert(
                kind.staging_key().to_string(),
                serde_json::Value::String(staged.name.clone()),
            );
        }
        map
    }
}
