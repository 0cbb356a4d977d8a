//! PostgreSQL adapter for the binding store
//!
//! Uses `SELECT ... FOR UPDATE NOWAIT` for the non-blocking row lock;
//! Postgres reports a held lock as SQLSTATE 55P03 (`lock_not_available`),
//! which is mapped to [`LockOutcome::Busy`] rather than an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

use searchlink_common::types::Binding;

use super::{BindingStore, LockOutcome, StoreError, StoreResult};
use crate::config::DatabaseConfig;

/// SQLSTATE code Postgres raises when `NOWAIT` cannot take the lock
const LOCK_NOT_AVAILABLE: &str = "55P03";

const BINDINGS_TABLE: &str = "search_bindings";

/// Binding store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    test_mode: bool,
}

impl PgStore {
    /// Create a store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            test_mode: false,
        }
    }

    /// Connect a new pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        if config.url.is_empty() {
            return Err(StoreError::Config("database URL cannot be empty".to_string()));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self::new(pool))
    }

    /// Mark the store as running inside an ephemeral test transaction
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Access the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BindingStore for PgStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn lock_binding(&self, tx: &mut Self::Tx, id: Uuid) -> StoreResult<LockOutcome> {
        let result = sqlx::query("SELECT id FROM search_bindings WHERE id = $1 FOR UPDATE NOWAIT")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await;

        match result {
            Ok(Some(_)) => Ok(LockOutcome::Locked),
            Ok(None) => Err(StoreError::BindingNotFound(id)),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) => {
                Ok(LockOutcome::Busy)
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_binding(&self, tx: &mut Self::Tx, id: Uuid) -> StoreResult<Binding> {
        let row = sqlx::query(
            r#"
            SELECT b.id, b.index_name, b.doc_type, b.last_sync, k.hosts
            FROM search_bindings b
            JOIN index_backends k ON b.backend_id = k.id
            WHERE b.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::BindingNotFound(id))?;

        Ok(Binding {
            id: row.try_get("id")?,
            index: row.try_get("index_name")?,
            doc_type: row.try_get("doc_type")?,
            last_sync: row.try_get::<Option<DateTime<Utc>>, _>("last_sync")?,
            hosts: row.try_get("hosts")?,
        })
    }

    async fn set_last_sync(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE search_bindings SET last_sync = $2 WHERE id = $1")
            .bind(id)
            .bind(timestamp)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::BindingNotFound(id));
        }

        Ok(())
    }

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()> {
        tx.commit().await?;
        Ok(())
    }

    fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    fn table_name(&self) -> &str {
        BINDINGS_TABLE
    }
}
