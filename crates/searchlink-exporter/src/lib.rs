//! Searchlink Exporter
//!
//! Reliable, idempotent export of record mutations from a source-of-record
//! store into a document search index.
//!
//! # Overview
//!
//! The hard problem is not the HTTP call to the search backend - it is
//! keeping the index consistent under concurrent, possibly out-of-order,
//! at-least-once job delivery. [`RecordExporter`] guarantees
//! exactly-once-effective propagation with three pieces:
//!
//! - **Row lock**: a non-blocking exclusive lock per binding row, so two
//!   workers never interleave index writes for the same record. Contention
//!   surfaces as a retryable conflict with a delay hint for the scheduler.
//! - **Staleness gate**: events older than the binding's last synchronized
//!   timestamp are discarded (logged, still successful) instead of
//!   regressing the index - last-writer-wins by event timestamp.
//! - **Transactional commit**: the timestamp update commits in the same
//!   transaction that releases the lock.
//!
//! # Architecture
//!
//! The pipeline is parameterized over two capability traits:
//!
//! - [`store::BindingStore`] - transactional access to binding rows
//!   ([`store::PgStore`] for PostgreSQL, [`store::MemoryStore`] for tests)
//! - [`index::IndexClient`] - document CRUD against the search backend
//!   ([`index::EsClient`] over HTTP, [`index::MemoryIndex`] for tests)
//!
//! # Example
//!
//! ```no_run
//! use searchlink_exporter::exporter::RecordExporter;
//! use searchlink_exporter::index::MemoryIndex;
//! use searchlink_exporter::store::MemoryStore;
//! use searchlink_common::types::parse_wire_timestamp;
//! use uuid::Uuid;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let exporter = RecordExporter::new(MemoryStore::new(), MemoryIndex::new());
//! let outcome = exporter
//!     .create(
//!         Uuid::new_v4(),
//!         parse_wire_timestamp("2020-01-01T00:00:00.000000")?,
//!         &serde_json::json!({"a": 1}),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod exporter;
pub mod hooks;
pub mod index;
pub mod store;

// Re-export commonly used types
pub use config::ExporterConfig;
pub use exporter::{ExportError, ExportOutcome, RecordExporter, DEFAULT_RETRY_DELAY_SECS};
pub use hooks::PostExportHook;
