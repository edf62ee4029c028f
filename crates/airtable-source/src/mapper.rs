//! Field mapper: external record to sanitized lead values.
//!
//! Pure transform. Each mapping entry selects a typed handler from its
//! [`Destination`]; list values are unwrapped (lookup) or rejected (link)
//! before the handler runs.

use serde_json::Value;
use sync_core::{
    destination_for, is_record_reference, Destination, ExternalRecord, FieldMappings, FieldValue,
    LeadColumn, MappedRecord, MappingError, StagedDimension, ValueKind,
};

/// Map one external record through the field mappings.
pub fn map_record(record: &ExternalRecord, mappings: &FieldMappings) -> MappedRecord {
    let mut mapped = MappedRecord::new(record.id.clone());

    for mapping in mappings {
        let field = mapping.external_field.as_str();
        let Some(raw) = record.fields.get(field) else {
            continue;
        };
        let raw = match unwrap_list(field, raw) {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(e) => {
                mapped.diagnostics.push(e);
                continue;
            }
        };

        match destination_for(&mapping.internal_field) {
            Some(Destination::Column(column)) => match sanitize(field, column, raw) {
                Ok(FieldValue::Null) => {}
                Ok(value) => {
                    mapped.values.insert(column.name.to_string(), value);
                }
                Err(e) => mapped.diagnostics.push(e),
            },
            Some(Destination::Dimension(kind)) => {
                if let Some(name) = value_to_text(raw).map(|s| clean_line(&s)) {
                    if !name.is_empty() {
                        mapped.staged.insert(
                            kind,
                            StagedDimension {
                                name,
                                auto_create: mapping.auto_create,
                            },
                        );
                    }
                }
            }
            None => mapped.diagnostics.push(MappingError::UnknownColumn {
                field: field.to_string(),
                internal: mapping.internal_field.clone(),
            }),
        }
    }

    mapped
}

/// Reduce a list value to its first element.
///
/// A list of record references is an unresolved link and cannot be mapped.
fn unwrap_list<'a>(field: &str, raw: &'a Value) -> Result<Option<&'a Value>, MappingError> {
    match raw {
        Value::Null => Ok(None),
        Value::Array(items) => match items.first() {
            None => Ok(None),
            Some(Value::String(first)) if is_record_reference(first) => {
                Err(MappingError::LinkedRecord {
                    field: field.to_string(),
                    reference: first.clone(),
                })
            }
            Some(Value::Null) => Ok(None),
            Some(first) => Ok(Some(first)),
        },
        other => Ok(Some(other)),
    }
}

fn sanitize(field: &str, column: &LeadColumn, raw: &Value) -> Result<FieldValue, MappingError> {
    match column.kind {
        ValueKind::Text => {
            let Some(text) = value_to_text(raw) else {
                return Ok(FieldValue::Null);
            };
            let mut text = if column.name == "notes" {
                clean_multiline(&text)
            } else {
                clean_line(&text)
            };
            if column.name == "email" {
                text = text.to_lowercase();
            }
            if let Some(max) = column.max_len {
                text = truncate_chars(text, max);
            }
            Ok(if text.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(text)
            })
        }
        ValueKind::Integer => parse_integer(raw)
            .map(FieldValue::Integer)
            .ok_or_else(|| MappingError::InvalidInteger {
                field: field.to_string(),
                value: value_to_text(raw).unwrap_or_default(),
            }),
        ValueKind::Json => Ok(match raw {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed) if parsed.is_object() || parsed.is_array() => FieldValue::Json(parsed),
                _ => FieldValue::Json(Value::String(s.clone())),
            },
            other => FieldValue::Json(other.clone()),
        }),
    }
}

fn value_to_text(raw: &Value) -> Option<String> {
    match raw {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(obj) => obj
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(raw.to_string())),
        Value::Array(_) => Some(raw.to_string()),
    }
}

fn parse_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, ',' | ' ' | '_'))
                .collect();
            cleaned.parse::<i64>().ok().or_else(|| {
                cleaned
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// Single-line text: whitespace controls become spaces, other controls are dropped.
fn clean_line(s: &str) -> String {
    let replaced: String = s
        .chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_multiline(s: &str) -> String {
    s.replace("\r\n", "\n")
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_core::{DimensionKind, FieldMapping};

    fn record(fields: Value) -> ExternalRecord {
        match fields {
            Value::Object(map) => ExternalRecord::new("recAAAAAAAAAAAAAA", map),
            _ => panic!("fields must be an object"),
        }
    }

    fn mappings(pairs: &[(&str, &str)]) -> FieldMappings {
        FieldMappings::new(pairs.iter().map(|(e, i)| FieldMapping::new(*e, *i)).collect())
    }

    #[test]
    fn test_lookup_list_uses_first_element() {
        let mapped = map_record(
            &record(json!({"Country": ["Oman", "Qatar"]})),
            &mappings(&[("Country", "country_id")]),
        );
        assert_eq!(mapped.staged[&DimensionKind::Country].name, "Oman");
        assert!(mapped.diagnostics.is_empty());
    }

    #[test]
    fn test_linked_record_list_is_skipped_with_diagnostic() {
        let mapped = map_record(
            &record(json!({"Country": ["recX1y2Z3a4B5c6D7"]})),
            &mappings(&[("Country", "country")]),
        );
        assert!(mapped.staged.is_empty());
        assert_eq!(
            mapped.diagnostics,
            vec![MappingError::LinkedRecord {
                field: "Country".into(),
                reference: "recX1y2Z3a4B5c6D7".into()
            }]
        );
        assert!(mapped.to_flat_map().get("country_name").is_none());
    }

    #[test]
    fn test_text_is_cleaned_and_email_lowercased() {
        let mapped = map_record(
            &record(json!({
                "Name": "  Sara \n Al\u{0007}i ",
                "Email": " Sara@Example.COM ",
                "Notes": "line one\r\nline two\u{0000}"
            })),
            &mappings(&[("Name", "name"), ("Email", "email"), ("Notes", "notes")]),
        );
        assert_eq!(mapped.get("name"), Some(&FieldValue::Text("Sara Ali".into())));
        assert_eq!(mapped.email(), Some("sara@example.com"));
        assert_eq!(
            mapped.get("notes"),
            Some(&FieldValue::Text("line one\nline two".into()))
        );
    }

    #[test]
    fn test_text_is_truncated_to_column_length() {
        let long = "9".repeat(80);
        let mapped = map_record(
            &record(json!({ "Phone": long })),
            &mappings(&[("Phone", "phone")]),
        );
        assert_eq!(mapped.get("phone").and_then(FieldValue::as_str).map(str::len), Some(50));
    }

    #[test]
    fn test_integer_parsing() {
        let mapped = map_record(
            &record(json!({"Budget": "12,500", "Score": 7.9})),
            &mappings(&[("Budget", "budget"), ("Score", "score")]),
        );
        assert_eq!(mapped.get("budget"), Some(&FieldValue::Integer(12500)));
        assert_eq!(mapped.get("score"), Some(&FieldValue::Integer(7)));

        let bad = map_record(
            &record(json!({"Budget": "lots"})),
            &mappings(&[("Budget", "budget")]),
        );
        assert!(bad.get("budget").is_none());
        assert!(matches!(
            bad.diagnostics[0],
            MappingError::InvalidInteger { .. }
        ));
    }

    #[test]
    fn test_json_column_parses_encoded_objects() {
        let mapped = map_record(
            &record(json!({"Extra": "{\"utm\":\"spring\"}", "Raw": {"a": 1}})),
            &mappings(&[("Extra", "custom_fields")]),
        );
        assert_eq!(
            mapped.get("custom_fields"),
            Some(&FieldValue::Json(json!({"utm": "spring"})))
        );
    }

    #[test]
    fn test_unknown_column_and_missing_fields() {
        let mapped = map_record(
            &record(json!({"Name": "A", "Fax": "123"})),
            &mappings(&[("Name", "name"), ("Fax", "fax_number"), ("Absent", "phone")]),
        );
        assert_eq!(mapped.values.len(), 1);
        assert_eq!(mapped.diagnostics.len(), 1);
        assert!(matches!(
            mapped.diagnostics[0],
            MappingError::UnknownColumn { .. }
        ));
    }

    #[test]
    fn test_auto_create_flag_is_staged() {
        let entries = FieldMappings::new(vec![
            FieldMapping::new("Campaign", "campaign").lookup_only(),
            FieldMapping::new("Source", "source_id"),
        ]);
        let mapped = map_record(
            &record(json!({"Campaign": "Spring Promo", "Source": "  "})),
            &entries,
        );
        assert!(!mapped.staged[&DimensionKind::Campaign].auto_create);
        assert!(!mapped.staged.contains_key(&DimensionKind::Source));
    }
}
