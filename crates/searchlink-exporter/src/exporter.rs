//! The record exporter pipeline
//!
//! One invocation per export event, driven by the external job system:
//!
//! ```text
//! START -> LOCK_ATTEMPT -> {LOCKED | CONFLICT}
//! CONFLICT -> FAIL(retryable)
//! LOCKED -> STALENESS_CHECK -> {APPLY | SKIP} -> COMMIT -> END
//! ```
//!
//! The row lock and the staleness gate together give per-binding
//! last-writer-wins ordering by event timestamp, independent of arrival
//! order. The commit that persists `last_sync` is the same commit that
//! releases the lock, so a partial failure never leaves the store and the
//! index permanently inconsistent.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use searchlink_common::types::{
    format_wire_timestamp, truncate_to_micros, Binding, ExportEvent, Operation,
};

use crate::hooks::{HookRegistry, PostExportHook};
use crate::index::{DeleteOutcome, DocumentTarget, IndexClient, IndexError};
use crate::store::{BindingStore, LockOutcome, StoreError};

/// Suggested delay before the job system retries a lock collision, seconds
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// How an invocation completed.
///
/// Both variants mean the job is done; `SkippedStale` is the normal outcome
/// for an event older than the binding's `last_sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The index mutation was applied and the timestamp advanced
    Applied,
    /// The event was older than the stored timestamp; nothing changed
    SkippedStale,
}

/// Export invocation errors
#[derive(Error, Debug)]
pub enum ExportError {
    /// A concurrent job holds the row lock; reschedule after `retry_after`
    #[error("A concurrent job is already exporting {table} record {id}; retry in {retry_after:?}")]
    Conflict {
        table: String,
        id: Uuid,
        retry_after: Duration,
    },

    /// Payload cannot be serialized - a data/contract bug, not retryable
    #[error("Failed to encode payload for binding {id}: {source}")]
    Encoding {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    /// Index protocol failure, passed through for the job system's retry policy
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Source-of-record failure, passed through unmodified
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExportError {
    /// Delay hint for retryable failures, `None` for hard errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExportError::Conflict { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Exports record mutations into the search index, exactly-once-effective.
///
/// Parameterized over the store and index capabilities so the same pipeline
/// runs against Postgres + Elasticsearch in production and the in-memory
/// adapters in tests.
pub struct RecordExporter<S: BindingStore, I: IndexClient> {
    store: S,
    index: I,
    retry_delay: Duration,
    hooks: HookRegistry,
}

impl<S: BindingStore, I: IndexClient> RecordExporter<S, I> {
    pub fn new(store: S, index: I) -> Self {
        Self {
            store,
            index,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            hooks: HookRegistry::new(),
        }
    }

    /// Override the retry delay hint surfaced on lock collisions
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Register a post-export hook; hooks run in registration order
    pub fn register_hook(&mut self, hook: Box<dyn PostExportHook>) {
        self.hooks.register(hook);
    }

    /// Export a newly linked record into the index.
    ///
    /// Creates are gate-exempt: they are assumed to be the first event for
    /// the binding and always apply, but they still take the row lock and
    /// still record the event timestamp. A duplicate create is a caller
    /// contract violation and propagates as [`IndexError::Conflict`].
    #[tracing::instrument(skip(self, payload))]
    pub async fn create(
        &self,
        binding_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> Result<ExportOutcome, ExportError> {
        let timestamp = truncate_to_micros(timestamp);
        let mut tx = self.store.begin().await?;
        self.lock(&mut tx, binding_id).await?;

        let binding = self.store.fetch_binding(&mut tx, binding_id).await?;
        let body = encode_payload(binding_id, payload)?;
        tracing::debug!(binding_id = %binding_id, body = %body, "Creating index document");

        self.index
            .create_document(&document_target(&binding), &body)
            .await?;
        self.store
            .set_last_sync(&mut tx, binding_id, timestamp)
            .await?;
        self.finish(tx).await?;

        self.run_hooks(Operation::Create, binding_id, timestamp, Some(payload), ExportOutcome::Applied)
            .await;
        Ok(ExportOutcome::Applied)
    }

    /// Propagate a record update into the index, unless the event is stale
    #[tracing::instrument(skip(self, payload))]
    pub async fn update(
        &self,
        binding_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> Result<ExportOutcome, ExportError> {
        let timestamp = truncate_to_micros(timestamp);
        let mut tx = self.store.begin().await?;
        self.lock(&mut tx, binding_id).await?;

        let binding = self.store.fetch_binding(&mut tx, binding_id).await?;
        let outcome = if is_fresh(&binding, timestamp) {
            let body = encode_payload(binding_id, payload)?;
            tracing::debug!(binding_id = %binding_id, body = %body, "Updating index document");

            self.index
                .update_document(&document_target(&binding), &body)
                .await?;
            self.store
                .set_last_sync(&mut tx, binding_id, timestamp)
                .await?;
            ExportOutcome::Applied
        } else {
            log_stale_skip(self.store.table_name(), &binding, timestamp);
            ExportOutcome::SkippedStale
        };

        // Commit on the skip path too: the lock must be released either way.
        self.finish(tx).await?;

        self.run_hooks(Operation::Update, binding_id, timestamp, Some(payload), outcome)
            .await;
        Ok(outcome)
    }

    /// Remove the record's document from the index, unless the event is
    /// stale. Deleting an already-absent document is a no-op success.
    #[tracing::instrument(skip(self))]
    pub async fn delete(
        &self,
        binding_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<ExportOutcome, ExportError> {
        let timestamp = truncate_to_micros(timestamp);
        let mut tx = self.store.begin().await?;
        self.lock(&mut tx, binding_id).await?;

        let binding = self.store.fetch_binding(&mut tx, binding_id).await?;
        let outcome = if is_fresh(&binding, timestamp) {
            let deleted = self
                .index
                .delete_document(&document_target(&binding))
                .await?;
            if deleted == DeleteOutcome::NotFound {
                tracing::debug!(binding_id = %binding_id, "Index document already absent");
            }
            self.store
                .set_last_sync(&mut tx, binding_id, timestamp)
                .await?;
            ExportOutcome::Applied
        } else {
            log_stale_skip(self.store.table_name(), &binding, timestamp);
            ExportOutcome::SkippedStale
        };

        self.finish(tx).await?;

        self.run_hooks(Operation::Delete, binding_id, timestamp, None, outcome)
            .await;
        Ok(outcome)
    }

    /// Take the non-blocking row lock, translating contention into a
    /// retryable conflict for the job scheduler
    async fn lock(&self, tx: &mut S::Tx, binding_id: Uuid) -> Result<(), ExportError> {
        match self.store.lock_binding(tx, binding_id).await? {
            LockOutcome::Locked => Ok(()),
            LockOutcome::Busy => {
                let table = self.store.table_name();
                tracing::info!(
                    table = %table,
                    binding_id = %binding_id,
                    "A concurrent job is already exporting the same record; job delayed"
                );
                Err(ExportError::Conflict {
                    table: table.to_string(),
                    id: binding_id,
                    retry_after: self.retry_delay,
                })
            },
        }
    }

    /// Commit the transaction, which also releases the row lock.
    ///
    /// In test mode the commit is skipped and the dropped handle rolls
    /// back, releasing the lock through the test transaction's teardown.
    async fn finish(&self, tx: S::Tx) -> Result<(), ExportError> {
        if self.store.is_test_mode() {
            drop(tx);
            return Ok(());
        }
        self.store.commit(tx).await?;
        Ok(())
    }

    async fn run_hooks(
        &self,
        operation: Operation,
        binding_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: Option<&serde_json::Value>,
        outcome: ExportOutcome,
    ) {
        if self.hooks.is_empty() {
            return;
        }
        let event = ExportEvent {
            operation,
            binding_id,
            timestamp,
            payload: payload.cloned(),
        };
        self.hooks.run(&event, outcome).await;
    }
}

/// Freshness check: unset or an equal-or-newer event applies.
///
/// Equality re-applies on purpose so that an at-least-once redelivery of the
/// exact same event stays idempotent instead of being dropped.
fn is_fresh(binding: &Binding, event_timestamp: DateTime<Utc>) -> bool {
    match binding.last_sync {
        None => true,
        Some(last_sync) => event_timestamp >= truncate_to_micros(last_sync),
    }
}

fn encode_payload(
    binding_id: Uuid,
    payload: &serde_json::Value,
) -> Result<String, ExportError> {
    serde_json::to_string(payload).map_err(|source| ExportError::Encoding {
        id: binding_id,
        source,
    })
}

fn document_target(binding: &Binding) -> DocumentTarget<'_> {
    DocumentTarget {
        hosts: &binding.hosts,
        index: &binding.index,
        doc_type: &binding.doc_type,
        id: binding.id,
    }
}

fn log_stale_skip(table: &str, binding: &Binding, event_timestamp: DateTime<Utc>) {
    tracing::info!(
        table = %table,
        binding_id = %binding.id,
        event_timestamp = %format_wire_timestamp(event_timestamp),
        "Record already synchronized with a newer event; skipping stale event"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchlink_common::types::parse_wire_timestamp;

    fn binding_with_sync(last_sync: Option<&str>) -> Binding {
        Binding {
            id: Uuid::new_v4(),
            index: "records".to_string(),
            doc_type: "record".to_string(),
            last_sync: last_sync.map(|s| parse_wire_timestamp(s).unwrap()),
            hosts: vec![],
        }
    }

    #[test]
    fn test_fresh_when_never_synced() {
        let binding = binding_with_sync(None);
        let ts = parse_wire_timestamp("2020-01-01T00:00:00.000000").unwrap();
        assert!(is_fresh(&binding, ts));
    }

    #[test]
    fn test_fresh_when_newer() {
        let binding = binding_with_sync(Some("2020-01-01T00:00:00.000000"));
        let ts = parse_wire_timestamp("2020-01-01T00:00:00.000001").unwrap();
        assert!(is_fresh(&binding, ts));
    }

    #[test]
    fn test_fresh_on_equal_timestamp() {
        let binding = binding_with_sync(Some("2020-01-01T00:00:00.000000"));
        let ts = parse_wire_timestamp("2020-01-01T00:00:00.000000").unwrap();
        assert!(is_fresh(&binding, ts));
    }

    #[test]
    fn test_stale_when_older() {
        let binding = binding_with_sync(Some("2020-01-01T00:00:00.000000"));
        let ts = parse_wire_timestamp("2019-12-31T23:59:59.000000").unwrap();
        assert!(!is_fresh(&binding, ts));
    }

    #[test]
    fn test_retry_after_only_on_conflict() {
        let conflict = ExportError::Conflict {
            table: "search_bindings".to_string(),
            id: Uuid::new_v4(),
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(conflict.retry_after(), Some(Duration::from_secs(2)));

        let encoding = ExportError::Encoding {
            id: Uuid::new_v4(),
            source: serde_json::from_str::<serde_json::Value>("not json").unwrap_err(),
        };
        assert_eq!(encoding.retry_after(), None);
    }
}
