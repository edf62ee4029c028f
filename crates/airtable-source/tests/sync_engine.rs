//! Engine behaviour against in-memory source and storage.

mod common;

use checkpoint::{MemoryStore, RunStateStore};
use common::*;
use lead_store::MemoryLeadStore;
use lead_sync_airtable::MemorySource;
use lead_sync_airtable_source::{load_status, Config, LeadSync};
use serde_json::json;
use sync_core::{DimensionKind, FieldMapping, FieldMappings, FieldValue};

fn text(value: &str) -> Option<FieldValue> {
    Some(FieldValue::Text(value.to_string()))
}

#[tokio::test]
async fn test_same_input_twice_yields_one_lead() {
    init_tracing();
    let source = MemorySource::new(leads(0..3));
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();

    let first = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert!(first.success, "{}", first.message);
    assert_eq!(first.cumulative.created, 3);

    let second = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert!(second.success, "{}", second.message);
    assert_eq!(second.cumulative.created, 0);
    assert_eq!(second.cumulative.updated, 3);
    assert_eq!(store.leads().len(), 3);
}

#[tokio::test]
async fn test_external_id_match_wins_over_email_match() {
    let store = MemoryLeadStore::new();
    let lead_a = store.seed_lead(Some("a@example.com"), Some(record_id(1).as_str()));
    let lead_b = store.seed_lead(Some("b@example.com"), None);
    let source = MemorySource::new(vec![record(
        record_id(1),
        json!({"Full Name": "Renamed", "Email": "B@Example.com"}),
    )]);
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert!(report.success, "{}", report.message);
    assert_eq!(report.cumulative.updated, 1);
    assert_eq!(report.cumulative.created, 0);

    let a = store.lead(lead_a).unwrap();
    assert_eq!(a.get("name").cloned(), text("Renamed"));
    assert_eq!(a.email(), Some("b@example.com"));
    let b = store.lead(lead_b).unwrap();
    assert_eq!(b.get("name").cloned(), text(""));
    assert!(b.external_id.is_none());
}

#[tokio::test]
async fn test_email_match_claims_external_id() {
    let store = MemoryLeadStore::new();
    let existing = store.seed_lead(Some("lead7@example.com"), None);
    let source = MemorySource::new(leads(7..8));
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert_eq!(report.cumulative.updated, 1);
    assert_eq!(
        store.lead(existing).unwrap().external_id,
        Some(record_id(7))
    );
}

#[tokio::test]
async fn test_two_chunks_add_up_to_one_full_sync() {
    init_tracing();
    let seeded = || {
        let store = MemoryLeadStore::new();
        for i in 0..20 {
            store.seed_lead(Some(email(i).as_str()), Some(record_id(i).as_str()));
        }
        store
    };

    // Chunked: one engine instance per invocation
    let source = MemorySource::new(leads(0..120));
    let store = seeded();
    let state = MemoryStore::new();

    let first = LeadSync::new(&source, &store, &state, config())
        .run_chunk("")
        .await;
    assert!(first.success, "{}", first.message);
    let chunk = first.chunk.unwrap();
    assert_eq!(chunk.processed, 100);
    assert_eq!(chunk.created, 80);
    assert_eq!(chunk.updated, 20);
    assert!(!first.is_complete);
    assert!(!first.next_cursor.is_empty());

    let in_progress = state.load_run_state().await.unwrap().unwrap();
    assert_eq!(in_progress.cursor, first.next_cursor);
    assert_eq!(in_progress.counters.processed, 100);

    let second = LeadSync::new(&source, &store, &state, config())
        .run_chunk(&first.next_cursor)
        .await;
    assert!(second.success, "{}", second.message);
    assert_eq!(second.chunk.unwrap().processed, 20);
    assert!(second.is_complete);
    assert_eq!(second.next_cursor, "");
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.cumulative.processed, 120);
    assert_eq!(second.cumulative.created, 100);
    assert_eq!(second.cumulative.updated, 20);

    // Single full run over the same data
    let full_source = MemorySource::new(leads(0..120));
    let full_store = seeded();
    let full_state = MemoryStore::new();
    let full = LeadSync::new(&full_source, &full_store, &full_state, config())
        .run_full_sync()
        .await;
    assert!(full.is_complete);
    assert_eq!(full.cumulative, second.cumulative);

    let status = load_status(&state).await.unwrap();
    assert!(status.in_progress.is_none());
    let last_run = status.last_run.unwrap();
    assert_eq!(last_run.counters, second.cumulative);
    assert_eq!(last_run.chunks, 2);
}

#[tokio::test]
async fn test_linked_record_field_is_skipped_with_warning() {
    let source = MemorySource::new(vec![record(
        record_id(1),
        json!({"Full Name": "Link", "Email": "link@example.com", "Country": ["recX1y2Z3a4B5c6D7"]}),
    )]);
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert!(report.success);
    assert_eq!(report.cumulative.created, 1);
    assert_eq!(report.cumulative.countries_created, 0);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("recX1y2Z3a4B5c6D7"));

    let lead = store.lead_by_external_id(&record_id(1)).unwrap();
    assert!(lead.foreign_keys.is_empty());
    assert!(store.dimensions(DimensionKind::Country).is_empty());
}

#[tokio::test]
async fn test_lookup_value_is_resolved_once_per_run() {
    let source = MemorySource::new(vec![
        record(record_id(1), json!({"Full Name": "A", "Country": ["Oman"]})),
        record(record_id(2), json!({"Full Name": "B", "Country": ["oman"]})),
    ]);
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert_eq!(report.cumulative.countries_created, 1);

    let stats = store.stats();
    assert_eq!(stats.find_dimension_calls, 1);
    assert_eq!(stats.insert_dimension_calls, 1);

    let country = store.dimensions(DimensionKind::Country)[0].clone();
    assert_eq!(country.name, "Oman");
    assert_eq!(country.code.as_deref(), Some("OMA"));
    for i in [1, 2] {
        let lead = store.lead_by_external_id(&record_id(i)).unwrap();
        assert_eq!(lead.foreign_keys.get(&DimensionKind::Country), Some(&country.id));
    }
}

#[tokio::test]
async fn test_existing_dimensions_come_from_prefetch() {
    let store = MemoryLeadStore::new();
    let oman = store.seed_dimension(DimensionKind::Country, "Oman", Some("عُمان"), Some("OM"));
    let source = MemorySource::new(vec![
        record(record_id(1), json!({"Full Name": "A", "Country": "Oman"})),
        record(record_id(2), json!({"Full Name": "B", "Country": ["Oman"]})),
    ]);
    let state = MemoryStore::new();

    let mut engine = LeadSync::new(&source, &store, &state, config());
    let report = engine.run_full_sync().await;
    assert_eq!(report.cumulative.countries_created, 0);
    assert_eq!(engine.cache().len(DimensionKind::Country), 2);

    let stats = store.stats();
    assert_eq!(stats.list_dimension_calls, DimensionKind::ALL.len());
    assert_eq!(stats.find_dimension_calls, 0);
    let lead = store.lead_by_external_id(&record_id(2)).unwrap();
    assert_eq!(lead.foreign_keys.get(&DimensionKind::Country), Some(&oman));
}

#[tokio::test]
async fn test_campaigns_with_same_initials_get_distinct_codes() {
    let source = MemorySource::new(vec![
        record(record_id(1), json!({"Full Name": "A", "Campaign": "Spring Sale Promo"})),
        record(record_id(2), json!({"Full Name": "B", "Campaign": "Summer Social Push"})),
        record(record_id(3), json!({"Full Name": "C", "Campaign": "Spring Sale Promo"})),
    ]);
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert_eq!(report.cumulative.campaigns_created, 2);

    let mut codes: Vec<String> = store
        .dimensions(DimensionKind::Campaign)
        .into_iter()
        .filter_map(|row| row.code)
        .collect();
    codes.sort();
    assert_eq!(codes, vec!["SSP", "SSP2"]);
}

#[tokio::test]
async fn test_lookup_only_mapping_never_creates_rows() {
    let mappings = FieldMappings::new(vec![
        FieldMapping::new("Full Name", "name"),
        FieldMapping::new("Campaign", "campaign_id").lookup_only(),
    ]);
    let source = MemorySource::new(vec![record(
        record_id(1),
        json!({"Full Name": "A", "Campaign": "Unknown Campaign"}),
    )]);
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();
    let config = Config {
        mappings: Some(mappings),
        ..Default::default()
    };

    let report = LeadSync::new(&source, &store, &state, config)
        .run_full_sync()
        .await;
    assert!(report.success);
    assert_eq!(report.cumulative.created, 1);
    assert!(store.dimensions(DimensionKind::Campaign).is_empty());
}

#[tokio::test]
async fn test_failed_dimension_insert_leaves_foreign_key_unset() {
    let source = MemorySource::new(vec![record(
        record_id(1),
        json!({"Full Name": "A", "Source": "Trade Show", "Country": "Qatar"}),
    )]);
    let store = MemoryLeadStore::new();
    store.fail_dimension_inserts(DimensionKind::Source);
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert!(report.success);
    assert_eq!(report.cumulative.created, 1);
    let lead = store.lead_by_external_id(&record_id(1)).unwrap();
    assert!(!lead.foreign_keys.contains_key(&DimensionKind::Source));
    assert!(lead.foreign_keys.contains_key(&DimensionKind::Country));
}

#[tokio::test]
async fn test_missing_columns_get_defaults_on_insert() {
    let source = MemorySource::new(vec![record(
        record_id(1),
        json!({"Email": "only@example.com", "Budget": "2500"}),
    )]);
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();

    LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    let lead = store.lead_by_external_id(&record_id(1)).unwrap();
    assert_eq!(lead.get("name").cloned(), text(""));
    assert_eq!(lead.get("status").cloned(), text("new"));
    assert_eq!(lead.get("priority").cloned(), text("medium"));
    assert_eq!(lead.get("score"), Some(&FieldValue::Integer(0)));
    assert_eq!(lead.get("budget"), Some(&FieldValue::Integer(2500)));
    assert_eq!(lead.get("phone"), Some(&FieldValue::Null));
}

#[tokio::test]
async fn test_duplicate_records_in_page_collapse_to_last() {
    let source = MemorySource::new(vec![
        record(record_id(1), json!({"Full Name": "First", "Email": "d@example.com"})),
        record(record_id(1), json!({"Full Name": "Second", "Email": "d@example.com"})),
    ]);
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert_eq!(report.cumulative.processed, 2);
    assert_eq!(report.cumulative.created, 1);
    let leads = store.leads();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].get("name").cloned(), text("Second"));
}

#[tokio::test]
async fn test_failing_record_is_reported_and_others_written() {
    let source = MemorySource::new(leads(0..5));
    let store = MemoryLeadStore::new();
    store.fail_writes_for_email(&email(2));
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_full_sync()
        .await;
    assert!(report.success);
    assert_eq!(report.cumulative.created, 4);
    assert_eq!(report.cumulative.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with(&record_id(2)));
}

#[tokio::test]
async fn test_dry_run_reports_presence_without_writing() {
    let mut records = leads(0..6);
    for i in 6..10 {
        records.push(record(record_id(i), json!({"Phone": "+968 9000 0000"})));
    }
    records.extend(leads(10..15));
    let source = MemorySource::new(records);
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_test_sync()
        .await;
    assert!(report.success, "{}", report.message);
    assert_eq!(report.records_fetched, 10);
    assert_eq!(report.records_with_name, 6);
    assert_eq!(report.records_with_email, 6);
    assert_eq!(report.field_presence["Full Name"], 6);
    assert_eq!(report.field_presence["Phone"], 4);
    assert_eq!(report.field_presence["Country"], 0);
    assert_eq!(report.samples.len(), 5);
    assert_eq!(report.samples[0]["email"], json!(email(0)));

    assert!(store.leads().is_empty());
    let stats = store.stats();
    assert_eq!(stats.insert_statements, 0);
    assert_eq!(stats.update_calls, 0);
    assert_eq!(stats.insert_dimension_calls, 0);
    assert!(source.mark_batches().is_empty());
    assert!(state.load_run_state().await.unwrap().is_none());
    assert!(state.load_last_run().await.unwrap().is_none());
}

#[tokio::test]
async fn test_dry_run_sample_shows_staged_dimension_names() {
    let source = MemorySource::new(vec![record(
        record_id(1),
        json!({"Full Name": "A", "Country": ["Oman"], "Source": ["recX1y2Z3a4B5c6D7"]}),
    )]);
    let store = MemoryLeadStore::new();
    let state = MemoryStore::new();

    let report = LeadSync::new(&source, &store, &state, config())
        .run_test_sync()
        .await;
    assert_eq!(report.samples[0]["country_name"], json!("Oman"));
    assert!(report.samples[0].get("source_name").is_none());
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(store.stats().find_dimension_calls, 0);
}
