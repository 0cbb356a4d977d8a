//! End-to-end tests for the export pipeline against the in-memory adapters
//!
//! These cover the exporter's contract with the job system: idempotent
//! re-delivery, last-writer-wins ordering, lock collisions surfacing as
//! retryable conflicts, and the commit/release discipline.

use std::time::Duration;

use async_trait::async_trait;
use searchlink_common::types::{parse_wire_timestamp, Binding};
use searchlink_exporter::exporter::{ExportError, ExportOutcome, RecordExporter};
use searchlink_exporter::index::{
    DeleteOutcome, DocumentTarget, IndexClient, IndexError, IndexResult, MemoryIndex,
};
use searchlink_exporter::store::{BindingStore, MemoryStore};
use uuid::Uuid;

/// Index client that pauses inside `update_document`, keeping the caller's
/// row lock held across an await point so overlapping jobs actually contend.
struct PausingIndex {
    inner: MemoryIndex,
}

#[async_trait]
impl IndexClient for PausingIndex {
    async fn create_document(&self, target: &DocumentTarget<'_>, body: &str) -> IndexResult<()> {
        self.inner.create_document(target, body).await
    }

    async fn update_document(&self, target: &DocumentTarget<'_>, body: &str) -> IndexResult<()> {
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.inner.update_document(target, body).await
    }

    async fn delete_document(&self, target: &DocumentTarget<'_>) -> IndexResult<DeleteOutcome> {
        self.inner.delete_document(target).await
    }
}

fn seed_binding(store: &MemoryStore) -> Uuid {
    let id = Uuid::new_v4();
    store.insert_binding(Binding {
        id,
        index: "records".to_string(),
        doc_type: "record".to_string(),
        last_sync: None,
        hosts: vec!["http://localhost:9200".to_string()],
    });
    id
}

fn ts(value: &str) -> chrono::DateTime<chrono::Utc> {
    parse_wire_timestamp(value).unwrap()
}

#[tokio::test]
async fn test_create_indexes_document_and_sets_timestamp() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    let outcome = exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap();

    assert_eq!(outcome, ExportOutcome::Applied);
    assert_eq!(
        index.document("records", "record", id),
        Some(serde_json::json!({"a": 1}))
    );
    assert_eq!(
        store.binding(id).unwrap().last_sync,
        Some(ts("2020-01-01T00:00:00.000000"))
    );
    assert!(!store.is_locked(id));
}

#[tokio::test]
async fn test_stale_update_is_skipped_but_completes() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap();

    // Older event arrives late; the index and timestamp must not regress.
    let outcome = exporter
        .update(id, ts("2019-12-31T23:59:59.000000"), &serde_json::json!({"a": 2}))
        .await
        .unwrap();

    assert_eq!(outcome, ExportOutcome::SkippedStale);
    assert_eq!(
        index.document("records", "record", id),
        Some(serde_json::json!({"a": 1}))
    );
    assert_eq!(
        store.binding(id).unwrap().last_sync,
        Some(ts("2020-01-01T00:00:00.000000"))
    );
    assert!(!store.is_locked(id));
}

#[tokio::test]
async fn test_equal_timestamp_reapplies() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap();

    // Redelivery of the same event must re-apply, not skip.
    let outcome = exporter
        .update(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap();

    assert_eq!(outcome, ExportOutcome::Applied);
    assert_eq!(
        store.binding(id).unwrap().last_sync,
        Some(ts("2020-01-01T00:00:00.000000"))
    );
}

#[tokio::test]
async fn test_delete_then_redelete_is_idempotent() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap();

    let outcome = exporter
        .delete(id, ts("2020-01-02T00:00:00.000000"))
        .await
        .unwrap();
    assert_eq!(outcome, ExportOutcome::Applied);
    assert_eq!(index.document("records", "record", id), None);
    assert_eq!(
        store.binding(id).unwrap().last_sync,
        Some(ts("2020-01-02T00:00:00.000000"))
    );

    // Deleting the already-deleted document is a no-op success.
    let outcome = exporter
        .delete(id, ts("2020-01-03T00:00:00.000000"))
        .await
        .unwrap();
    assert_eq!(outcome, ExportOutcome::Applied);
    assert_eq!(
        store.binding(id).unwrap().last_sync,
        Some(ts("2020-01-03T00:00:00.000000"))
    );
}

#[tokio::test]
async fn test_lock_collision_is_retryable_conflict() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap();

    // A concurrent transaction holds the row lock.
    let mut other_tx = store.begin().await.unwrap();
    store.lock_binding(&mut other_tx, id).await.unwrap();

    let err = exporter
        .update(id, ts("2020-01-02T00:00:00.000000"), &serde_json::json!({"a": 2}))
        .await
        .unwrap_err();

    match err {
        ExportError::Conflict { retry_after, id: conflict_id, .. } => {
            assert_eq!(retry_after, Duration::from_secs(2));
            assert_eq!(conflict_id, id);
        },
        other => panic!("expected Conflict, got {other:?}"),
    }

    // Nothing was applied while the lock was contended.
    assert_eq!(
        index.document("records", "record", id),
        Some(serde_json::json!({"a": 1}))
    );

    // Once the holder commits, the retried job goes through.
    store.commit(other_tx).await.unwrap();
    let outcome = exporter
        .update(id, ts("2020-01-02T00:00:00.000000"), &serde_json::json!({"a": 2}))
        .await
        .unwrap();
    assert_eq!(outcome, ExportOutcome::Applied);
}

#[tokio::test]
async fn test_simultaneous_updates_one_applies_one_conflicts() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(
        store.clone(),
        PausingIndex {
            inner: index.clone(),
        },
    );

    exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"v": 0}))
        .await
        .unwrap();

    // Two jobs race for the same binding; exactly one may win the row lock.
    let payload_one = serde_json::json!({"v": 1});
    let payload_two = serde_json::json!({"v": 2});
    let (first, second) = tokio::join!(
        exporter.update(id, ts("2020-01-01T00:00:01.000000"), &payload_one),
        exporter.update(id, ts("2020-01-01T00:00:02.000000"), &payload_two),
    );

    let results = [first, second];
    let applied = results
        .iter()
        .filter(|result| matches!(result, Ok(ExportOutcome::Applied)))
        .count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(ExportError::Conflict { .. })))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(conflicts, 1);

    let conflict = results
        .iter()
        .find_map(|result| result.as_ref().err())
        .unwrap();
    assert_eq!(conflict.retry_after(), Some(Duration::from_secs(2)));

    // The loser released nothing it held; a retry succeeds immediately.
    assert!(!store.is_locked(id));
    let outcome = exporter
        .update(id, ts("2020-01-01T00:00:03.000000"), &serde_json::json!({"v": 3}))
        .await
        .unwrap();
    assert_eq!(outcome, ExportOutcome::Applied);
    assert_eq!(
        index.document("records", "record", id),
        Some(serde_json::json!({"v": 3}))
    );
}

#[tokio::test]
async fn test_update_of_missing_document_propagates_not_found() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    // No create ever reached the index for this binding.
    let err = exporter
        .update(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExportError::Index(IndexError::NotFound { .. })
    ));

    // The failed update must not advance the timestamp or leak the lock.
    assert_eq!(store.binding(id).unwrap().last_sync, None);
    assert!(!store.is_locked(id));
}

#[tokio::test]
async fn test_monotonic_timestamp_under_out_of_order_delivery() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"v": 0}))
        .await
        .unwrap();

    // Events delivered out of order; the newest one must win.
    let deliveries = [
        ("2020-01-01T00:00:03.000000", 3),
        ("2020-01-01T00:00:01.000000", 1),
        ("2020-01-01T00:00:02.000000", 2),
    ];
    for (when, version) in deliveries {
        exporter
            .update(id, ts(when), &serde_json::json!({"v": version}))
            .await
            .unwrap();
    }

    assert_eq!(
        store.binding(id).unwrap().last_sync,
        Some(ts("2020-01-01T00:00:03.000000"))
    );
    assert_eq!(
        index.document("records", "record", id),
        Some(serde_json::json!({"v": 3}))
    );
}

#[tokio::test]
async fn test_duplicate_create_propagates_conflict() {
    let store = MemoryStore::new();
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap();

    let err = exporter
        .create(id, ts("2020-01-01T00:00:01.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Index(_)));

    // The failed create must not advance the timestamp or leak the lock.
    assert_eq!(
        store.binding(id).unwrap().last_sync,
        Some(ts("2020-01-01T00:00:00.000000"))
    );
    assert!(!store.is_locked(id));
}

#[tokio::test]
async fn test_test_mode_skips_commit_but_releases_lock() {
    let store = MemoryStore::new().with_test_mode(true);
    let index = MemoryIndex::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), index.clone());

    exporter
        .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
        .await
        .unwrap();

    // The rolled-back test transaction discards the timestamp write but the
    // lock is free for the next invocation.
    assert_eq!(store.binding(id).unwrap().last_sync, None);
    assert!(!store.is_locked(id));
}

#[tokio::test]
async fn test_unknown_binding_is_store_error() {
    let exporter = RecordExporter::new(MemoryStore::new(), MemoryIndex::new());

    let err = exporter
        .delete(Uuid::new_v4(), ts("2020-01-01T00:00:00.000000"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Store(_)));
}

#[tokio::test]
async fn test_custom_retry_delay_is_surfaced() {
    let store = MemoryStore::new();
    let id = seed_binding(&store);
    let exporter = RecordExporter::new(store.clone(), MemoryIndex::new())
        .with_retry_delay(Duration::from_secs(7));

    let mut other_tx = store.begin().await.unwrap();
    store.lock_binding(&mut other_tx, id).await.unwrap();

    let err = exporter
        .delete(id, ts("2020-01-01T00:00:00.000000"))
        .await
        .unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

mod hook_tests {
    use super::*;
    use async_trait::async_trait;
    use searchlink_common::types::ExportEvent;
    use searchlink_exporter::hooks::PostExportHook;
    use std::sync::{Arc, Mutex};

    struct Recording {
        outcomes: Arc<Mutex<Vec<ExportOutcome>>>,
    }

    #[async_trait]
    impl PostExportHook for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn after_export(
            &self,
            _event: &ExportEvent,
            outcome: ExportOutcome,
        ) -> anyhow::Result<()> {
            self.outcomes.lock().unwrap().push(outcome);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hooks_run_on_apply_and_skip_paths() {
        let store = MemoryStore::new();
        let id = seed_binding(&store);
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let mut exporter = RecordExporter::new(store.clone(), MemoryIndex::new());
        exporter.register_hook(Box::new(Recording {
            outcomes: Arc::clone(&outcomes),
        }));

        exporter
            .create(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
            .await
            .unwrap();
        exporter
            .update(id, ts("2019-01-01T00:00:00.000000"), &serde_json::json!({"a": 2}))
            .await
            .unwrap();

        assert_eq!(
            *outcomes.lock().unwrap(),
            vec![ExportOutcome::Applied, ExportOutcome::SkippedStale]
        );
    }

    #[tokio::test]
    async fn test_hooks_do_not_run_on_lock_conflict() {
        let store = MemoryStore::new();
        let id = seed_binding(&store);
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let mut exporter = RecordExporter::new(store.clone(), MemoryIndex::new());
        exporter.register_hook(Box::new(Recording {
            outcomes: Arc::clone(&outcomes),
        }));

        let mut other_tx = store.begin().await.unwrap();
        store.lock_binding(&mut other_tx, id).await.unwrap();

        let result = exporter
            .update(id, ts("2020-01-01T00:00:00.000000"), &serde_json::json!({"a": 1}))
            .await;
        assert!(result.is_err());
        assert!(outcomes.lock().unwrap().is_empty());
    }
}
