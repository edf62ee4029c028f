//! Fixtures shared by the engine integration tests.

#![allow(dead_code)]

use lead_sync_airtable_source::Config;
use serde_json::{json, Value};
use sync_core::{ExternalRecord, FieldMapping, FieldMappings};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub fn record_id(i: usize) -> String {
    format!("rec{i:014}")
}

pub fn email(i: usize) -> String {
    format!("lead{i}@example.com")
}

pub fn record(id: impl Into<String>, fields: Value) -> ExternalRecord {
    match fields {
        Value::Object(map) => ExternalRecord::new(id, map),
        _ => panic!("fields must be a JSON object"),
    }
}

/// `n` records with a name and an email each.
pub fn leads(range: std::ops::Range<usize>) -> Vec<ExternalRecord> {
    range
        .map(|i| {
            record(
                record_id(i),
                json!({"Full Name": format!("Lead {i}"), "Email": email(i)}),
            )
        })
        .collect()
}

pub fn mappings() -> FieldMappings {
    FieldMappings::new(vec![
        FieldMapping::new("Full Name", "name"),
        FieldMapping::new("Email", "email"),
        FieldMapping::new("Phone", "phone"),
        FieldMapping::new("Budget", "budget"),
        FieldMapping::new("Country", "country_id"),
        FieldMapping::new("Campaign", "campaign"),
        FieldMapping::new("Source", "source_name"),
    ])
}

pub fn config() -> Config {
    Config {
        mappings: Some(mappings()),
        ..Default::default()
    }
}
