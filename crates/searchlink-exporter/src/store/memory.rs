//! In-memory adapter for the binding store
//!
//! Mirrors the Postgres adapter's lock and transaction semantics closely
//! enough for unit tests and embedded use: the per-row lock is taken
//! non-blocking at `lock_binding` and released on commit or when the
//! transaction handle is dropped; timestamp writes stay buffered in the
//! handle until commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use searchlink_common::types::Binding;

use super::{BindingStore, LockOutcome, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Shared {
    rows: Mutex<HashMap<Uuid, Binding>>,
    held_locks: Mutex<HashSet<Uuid>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned mutex only means another test thread panicked mid-write;
    // the map itself is still usable.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Binding store held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    test_mode: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the store as running inside an ephemeral test context
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Insert or replace a binding row
    pub fn insert_binding(&self, binding: Binding) {
        guard(&self.shared.rows).insert(binding.id, binding);
    }

    /// Read the committed state of a binding row
    pub fn binding(&self, id: Uuid) -> Option<Binding> {
        guard(&self.shared.rows).get(&id).cloned()
    }

    /// Whether some transaction currently holds the row lock
    pub fn is_locked(&self, id: Uuid) -> bool {
        guard(&self.shared.held_locks).contains(&id)
    }
}

/// Transaction handle for [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryTx {
    shared: Arc<Shared>,
    held: Vec<Uuid>,
    pending_sync: Vec<(Uuid, DateTime<Utc>)>,
    finished: bool,
}

impl MemoryTx {
    fn release_locks(&mut self) {
        let mut locks = guard(&self.shared.held_locks);
        for id in self.held.drain(..) {
            locks.remove(&id);
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        // Rollback path: discard pending writes, free the row locks.
        if !self.finished {
            self.release_locks();
        }
    }
}

#[async_trait]
impl BindingStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            held: Vec::new(),
            pending_sync: Vec::new(),
            finished: false,
        })
    }

    async fn lock_binding(&self, tx: &mut Self::Tx, id: Uuid) -> StoreResult<LockOutcome> {
        if !guard(&self.shared.rows).contains_key(&id) {
            return Err(StoreError::BindingNotFound(id));
        }
        if tx.held.contains(&id) {
            return Ok(LockOutcome::Locked);
        }

        let mut locks = guard(&self.shared.held_locks);
        if locks.contains(&id) {
            return Ok(LockOutcome::Busy);
        }
        locks.insert(id);
        tx.held.push(id);
        Ok(LockOutcome::Locked)
    }

    async fn fetch_binding(&self, _tx: &mut Self::Tx, id: Uuid) -> StoreResult<Binding> {
        guard(&self.shared.rows)
            .get(&id)
            .cloned()
            .ok_or(StoreError::BindingNotFound(id))
    }

    async fn set_last_sync(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        if !guard(&self.shared.rows).contains_key(&id) {
            return Err(StoreError::BindingNotFound(id));
        }
        tx.pending_sync.push((id, timestamp));
        Ok(())
    }

    async fn commit(&self, mut tx: Self::Tx) -> StoreResult<()> {
        {
            let mut rows = guard(&self.shared.rows);
            for (id, timestamp) in tx.pending_sync.drain(..) {
                if let Some(binding) = rows.get_mut(&id) {
                    binding.last_sync = Some(timestamp);
                }
            }
        }
        tx.release_locks();
        tx.finished = true;
        Ok(())
    }

    fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    fn table_name(&self) -> &str {
        "search_bindings"
    }
}
