//! Unit tests for the checkpoint crate.

use chrono::{Duration, Utc};
use std::sync::{Arc, Barrier};
use sync_core::SyncCounters;
use tempfile::TempDir;

use crate::{FilesystemStore, MemoryStore, RunLease, RunPhase, RunStateStore, SyncRunState};

fn chunk(processed: u64, created: u64, updated: u64) -> SyncCounters {
    SyncCounters {
        processed,
        created,
        updated,
        ..Default::default()
    }
}

// ============================================================================
// SyncRunState Tests
// ============================================================================

#[test]
fn test_run_state_phases() {
    let mut state = SyncRunState::start();
    assert_eq!(state.phase, RunPhase::Start);
    assert!(state.cursor.is_empty());

    state.advance(&chunk(100, 80, 20), "itrx/recB", &[]);
    assert_eq!(state.phase, RunPhase::InProgress);
    assert_eq!(state.cursor, "itrx/recB");
    assert_eq!(state.chunks, 1);

    state.advance(&chunk(20, 5, 15), "", &["bad row".to_string()]);
    assert!(state.is_complete());
    assert_eq!(state.counters.processed, 120);
    assert_eq!(state.counters.created, 85);
    assert_eq!(state.counters.updated, 35);

    let summary = state.summary();
    assert_eq!(summary.chunks, 2);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.run_id, state.run_id);
}

#[test]
fn test_run_state_remembers_counted_cursor() {
    let mut state = SyncRunState::start();
    state.advance(&chunk(2, 2, 0), "page-2", &[]);
    state.advance(&chunk(2, 2, 0), "page-4", &[]);
    assert_eq!(state.previous_cursor, "page-2");
    assert!(state.already_counted("page-2"));
    assert!(!state.already_counted("page-4"));
    assert!(!state.already_counted("page-9"));
}

#[test]
fn test_run_state_without_previous_cursor_deserializes() {
    let mut value = serde_json::to_value(SyncRunState::start()).unwrap();
    value.as_object_mut().unwrap().remove("previous_cursor");
    let state: SyncRunState = serde_json::from_value(value).unwrap();
    assert!(state.previous_cursor.is_empty());
}

#[test]
fn test_run_state_caps_errors() {
    let mut state = SyncRunState::start();
    let errors: Vec<String> = (0..150).map(|i| format!("error {i}")).collect();
    state.advance(&SyncCounters::default(), "next", &errors);
    assert_eq!(state.errors.len(), 100);
    assert_eq!(state.errors[0], "error 50");
}

#[test]
fn test_run_phase_display() {
    assert_eq!(format!("{}", RunPhase::InProgress), "in_progress");
    let json = serde_json::to_string(&RunPhase::Complete).unwrap();
    assert_eq!(json, "\"complete\"");
}

// ============================================================================
// Lease Tests
// ============================================================================

#[test]
fn test_lease_replacement_rules() {
    let held = RunLease::new(Duration::seconds(60));
    let other = RunLease::new(Duration::seconds(60));
    assert!(!other.can_replace(&held));
    assert!(held.can_replace(&held));

    let expired = RunLease {
        owner: "old".into(),
        acquired_at: Utc::now() - Duration::seconds(120),
        expires_at: Utc::now() - Duration::seconds(60),
    };
    assert!(other.can_replace(&expired));
}

async fn exercise_lease<S: RunStateStore>(store: &S) {
    let first = RunLease::new(Duration::seconds(60));
    let second = RunLease::new(Duration::seconds(60));

    assert!(store.try_acquire_lease(&first).await.unwrap());
    assert!(!store.try_acquire_lease(&second).await.unwrap());

    // Releasing with the wrong owner is a no-op
    store.release_lease(&second.owner).await.unwrap();
    assert!(!store.try_acquire_lease(&second).await.unwrap());

    store.release_lease(&first.owner).await.unwrap();
    assert!(store.try_acquire_lease(&second).await.unwrap());
}

#[tokio::test]
async fn test_memory_store_lease() {
    let store = MemoryStore::new();
    exercise_lease(&store).await;
    assert!(store.current_lease().is_some());
}

#[tokio::test]
async fn test_filesystem_store_lease() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path());
    exercise_lease(&store).await;
}

#[tokio::test]
async fn test_filesystem_store_takes_over_expired_lease() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path());
    let stale = RunLease {
        owner: "crashed".into(),
        acquired_at: Utc::now() - Duration::seconds(120),
        expires_at: Utc::now() - Duration::seconds(60),
    };
    assert!(store.try_acquire_lease(&stale).await.unwrap());
    assert!(store
        .try_acquire_lease(&RunLease::new(Duration::seconds(30)))
        .await
        .unwrap());
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

#[test]
fn test_filesystem_lease_has_one_holder_under_contention() {
    const CONTENDERS: usize = 8;
    for _ in 0..50 {
        let tmp = TempDir::new().unwrap();
        let stale = RunLease {
            owner: "crashed".into(),
            acquired_at: Utc::now() - Duration::hours(2),
            expires_at: Utc::now() - Duration::hours(1),
        };
        assert!(block_on(FilesystemStore::new(tmp.path()).try_acquire_lease(&stale)).unwrap());

        let barrier = Arc::new(Barrier::new(CONTENDERS));
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|_| {
                let dir = tmp.path().to_path_buf();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let store = FilesystemStore::new(dir);
                    barrier.wait();
                    let lease = RunLease::new(Duration::minutes(5));
                    block_on(store.try_acquire_lease(&lease)).unwrap()
                })
            })
            .collect();

        let holders = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|acquired| *acquired)
            .count();
        assert_eq!(holders, 1);
    }
}

#[tokio::test]
async fn test_filesystem_lease_file_is_never_partial() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path());
    let lease = RunLease::new(Duration::seconds(60));
    assert!(store.try_acquire_lease(&lease).await.unwrap());

    let names: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().all(|name| !name.ends_with(".tmp")), "{names:?}");

    let content = std::fs::read_to_string(tmp.path().join("lead_sync.lease")).unwrap();
    let stored: RunLease = serde_json::from_str(&content).unwrap();
    assert_eq!(stored, lease);
}

// ============================================================================
// Store Tests
// ============================================================================

async fn exercise_state<S: RunStateStore>(store: &S) {
    assert!(store.load_run_state().await.unwrap().is_none());

    let mut state = SyncRunState::start();
    state.advance(&chunk(10, 10, 0), "cursor-1", &[]);
    store.save_run_state(&state).await.unwrap();

    let loaded = store.load_run_state().await.unwrap().unwrap();
    assert_eq!(loaded, state);

    state.advance(&chunk(5, 0, 5), "", &[]);
    store.save_last_run(&state.summary()).await.unwrap();
    store.clear_run_state().await.unwrap();
    store.clear_run_state().await.unwrap();

    assert!(store.load_run_state().await.unwrap().is_none());
    let last = store.load_last_run().await.unwrap().unwrap();
    assert_eq!(last.counters.processed, 15);
}

#[tokio::test]
async fn test_memory_store_state() {
    exercise_state(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_filesystem_store_state() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path().join("nested"));
    exercise_state(&store).await;
}

#[tokio::test]
async fn test_unreadable_run_state_is_discarded() {
    let store = MemoryStore::new();
    store
        .put_value(crate::RUN_STATE_KEY, "{not json".to_string())
        .await
        .unwrap();
    assert!(store.load_run_state().await.unwrap().is_none());
}
