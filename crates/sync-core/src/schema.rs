//! Field mapping configuration.
//!
//! A mapping is an ordered list of `{external_field, internal_field, auto_create}`
//! entries. It is persisted as serialized text by the surrounding system and
//! edited outside of the engine, so [`FieldMappings::parse_stored`] never fails:
//! it accepts the current format and several legacy shapes, normalizes them,
//! and reports anything it had to drop as a diagnostic.
//!
//! ## Accepted formats
//!
//! - JSON list of objects (current): `[{"external_field": "Name", "internal_field": "name"}]`
//! - JSON object: `{"Name": "name", "Email": "email"}`
//! - JSON list of tuples: `[["Name", "name"], ["Country", "country", false]]`
//! - A JSON string wrapping any of the above (double-encoded)
//! - YAML of any of the above

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// Error Types
// ============================================================================

/// Per-field problem found while mapping one external record.
///
/// These never abort a record; the field is skipped and the error is kept
/// as a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The value is a list of internal record ids rather than a lookup result
    #[error(
        "Field '{field}' contains linked record id '{reference}'; map a lookup field instead"
    )]
    LinkedRecord { field: String, reference: String },

    /// The mapping targets a column the lead table does not have
    #[error("Field '{field}' is mapped to unknown column '{internal}'")]
    UnknownColumn { field: String, internal: String },

    /// The value cannot be converted to an integer column
    #[error("Field '{field}' value '{value}' is not a valid integer")]
    InvalidInteger { field: String, value: String },
}

// ============================================================================
// Mapping entries
// ============================================================================

fn default_auto_create() -> bool {
    true
}

/// One mapping entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name in the external source
    #[serde(alias = "external", alias = "airtable_field", alias = "source")]
    pub external_field: String,

    /// Lead column or dimension the field is written to
    #[serde(alias = "internal", alias = "db_field", alias = "target")]
    pub internal_field: String,

    /// Whether missing dimension rows may be created on demand
    #[serde(default = "default_auto_create")]
    pub auto_create: bool,
}

impl FieldMapping {
    pub fn new(external_field: impl Into<String>, internal_field: impl Into<String>) -> Self {
        Self {
            external_field: external_field.into(),
            internal_field: internal_field.into(),
            auto_create: true,
        }
    }

    pub fn lookup_only(mut self) -> Self {
        self.auto_create = false;
        self
    }

    fn is_valid(&self) -> bool {
        !self.external_field.trim().is_empty() && !self.internal_field.trim().is_empty()
    }
}

/// Ordered list of mapping entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMappings(pub Vec<FieldMapping>);

/// Result of a defensive parse.
#[derive(Debug, Clone, Default)]
pub struct ParsedMappings {
    pub mappings: FieldMappings,
    /// Problems found and worked around while parsing
    pub diagnostics: Vec<String>,
    /// True when the stored text was not in the current format
    pub normalized: bool,
}

impl FieldMappings {
    pub fn new(entries: Vec<FieldMapping>) -> Self {
        Self(entries)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldMapping> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize in the current storage format.
    pub fn to_stored(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    /// Load and parse a mapping file (JSON or YAML).
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<ParsedMappings> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_stored(&content))
    }

    /// Parse stored mapping text, tolerating legacy and malformed input.
    pub fn parse_stored(text: &str) -> ParsedMappings {
        let mut parsed = ParsedMappings::default();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return parsed;
        }

        let value = match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(v) => v,
            Err(json_err) => match serde_yaml::from_str::<serde_json::Value>(trimmed) {
                Ok(v) => {
                    parsed.normalized = true;
                    v
                }
                Err(yaml_err) => {
                    parsed.diagnostics.push(format!(
                        "Stored field mapping is unreadable (json: {json_err}; yaml: {yaml_err})"
                    ));
                    parsed.normalized = true;
                    return parsed;
                }
            },
        };

        let value = unwrap_encoded(value, &mut parsed);
        collect_entries(value, &mut parsed);
        parsed
    }
}

impl<'a> IntoIterator for &'a FieldMappings {
    type Item = &'a FieldMapping;
    type IntoIter = std::slice::Iter<'a, FieldMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Undo up to two levels of string-wrapped JSON.
fn unwrap_encoded(mut value: serde_json::Value, parsed: &mut ParsedMappings) -> serde_json::Value {
    for _ in 0..2 {
        match &value {
            serde_json::Value::String(inner) => match serde_json::from_str(inner) {
                Ok(v) => {
                    parsed.normalized = true;
                    value = v;
                }
                Err(_) => break,
            },
            _ => break,
        }
    }
    value
}

fn collect_entries(value: serde_json::Value, parsed: &mut ParsedMappings) {
    match value {
        serde_json::Value::Array(items) => {
            for (index, item) in items.into_iter().enumerate() {
                match entry_from_value(item) {
                    Some((entry, legacy)) if entry.is_valid() => {
                        parsed.normalized |= legacy;
                        parsed.mappings.0.push(entry);
                    }
                    _ => {
                        parsed.normalized = true;
                        parsed
                            .diagnostics
                            .push(format!("Dropped invalid field mapping entry #{index}"));
                    }
                }
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(inner) = map.get("mappings").cloned() {
                parsed.normalized = true;
                return collect_entries(inner, parsed);
            }
            parsed.normalized = true;
            for (external, internal) in map {
                match internal {
                    serde_json::Value::String(internal) if !internal.trim().is_empty() => {
                        parsed.mappings.0.push(FieldMapping::new(external, internal));
                    }
                    _ => parsed
                        .diagnostics
                        .push(format!("Dropped field mapping for '{external}'")),
                }
            }
        }
        serde_json::Value::Null => {}
        other => {
            parsed.normalized = true;
            parsed.diagnostics.push(format!(
                "Stored field mapping has unexpected shape: {}",
                type_name(&other)
            ));
        }
    }
}

/// Decode one list item. The flag is true for legacy tuple items.
fn entry_from_value(item: serde_json::Value) -> Option<(FieldMapping, bool)> {
    match item {
        serde_json::Value::Object(_) => serde_json::from_value(item).ok().map(|m| (m, false)),
        serde_json::Value::Array(parts) => {
            let external = parts.first()?.as_str()?.to_string();
            let internal = parts.get(1)?.as_str()?.to_string();
            let auto_create = match parts.get(2) {
                Some(serde_json::Value::Bool(b)) => *b,
                Some(serde_json::Value::Number(n)) => n.as_i64() != Some(0),
                Some(serde_json::Value::String(s)) => !matches!(s.as_str(), "0" | "false" | ""),
                _ => true,
            };
            Some((
                FieldMapping {
                    external_field: external,
                    internal_field: internal,
                    auto_create,
                },
                true,
            ))
        }
        _ => None,
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
