//! Source-of-record store capability
//!
//! The exporter never talks to the store directly; it goes through
//! [`BindingStore`], which scopes every operation to an explicit transaction
//! handle. The row lock taken by [`BindingStore::lock_binding`] is held until
//! the handle is committed or dropped, which is what makes the commit step
//! double as the lock release.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use searchlink_common::types::Binding;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of a non-blocking exclusive lock attempt on a binding row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock acquired; held until the transaction commits or rolls back
    Locked,
    /// Another transaction holds the lock - an export collision in progress
    Busy,
}

/// Store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQL query or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Requested binding row does not exist
    #[error("Binding '{0}' not found in store")]
    BindingNotFound(Uuid),

    /// Store configuration is invalid or missing
    #[error("Store configuration error: {0}")]
    Config(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transactional access to binding rows in the source-of-record store.
///
/// All mutations happen against a transaction handle obtained from
/// [`begin`](Self::begin); nothing is visible to other transactions until
/// [`commit`](Self::commit). Dropping an uncommitted handle rolls back and
/// releases any row locks it holds.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Transaction handle; dropping it without commit rolls back
    type Tx: Send;

    /// Open a new transaction
    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Attempt an exclusive, non-blocking lock on the binding's row.
    ///
    /// Never waits: if another transaction holds the lock this returns
    /// [`LockOutcome::Busy`] immediately.
    async fn lock_binding(&self, tx: &mut Self::Tx, id: Uuid) -> StoreResult<LockOutcome>;

    /// Read the binding with its backend hosts resolved
    async fn fetch_binding(&self, tx: &mut Self::Tx, id: Uuid) -> StoreResult<Binding>;

    /// Record the timestamp of the event just applied to the index
    async fn set_last_sync(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Commit the transaction, persisting writes and releasing row locks
    async fn commit(&self, tx: Self::Tx) -> StoreResult<()>;

    /// Whether the surrounding execution context is ephemeral (tests).
    ///
    /// In test mode the exporter skips the explicit commit and lets the
    /// test transaction's own teardown release the lock.
    fn is_test_mode(&self) -> bool;

    /// Name of the binding table, used in contention log lines
    fn table_name(&self) -> &str;
}
