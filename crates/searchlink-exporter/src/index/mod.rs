//! Search-index client capability
//!
//! The exporter forwards opaque, already-serialized JSON bodies; it does no
//! schema mapping and owns no index lifecycle. "Not found" on delete is a
//! distinguishable outcome rather than an error because the exporter
//! tolerates deleting a document that is already gone.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod elastic;
pub mod memory;

pub use elastic::EsClient;
pub use memory::MemoryIndex;

/// Location of a document in the search backend
#[derive(Debug, Clone, Copy)]
pub struct DocumentTarget<'a> {
    /// Backend hosts, tried in order
    pub hosts: &'a [String],
    /// Index name
    pub index: &'a str,
    /// Document collection within the index
    pub doc_type: &'a str,
    /// Document id, shared with the binding
    pub id: Uuid,
}

/// Result of a delete call against the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The document was already absent
    NotFound,
}

/// Index protocol and transport errors
#[derive(Error, Debug)]
pub enum IndexError {
    /// Create hit an existing document - a caller contract violation
    #[error("Document {id} already exists in {index}/{doc_type}")]
    Conflict {
        index: String,
        doc_type: String,
        id: Uuid,
    },

    /// Update targeted a document that does not exist
    #[error("Document {id} not found in {index}/{doc_type}")]
    NotFound {
        index: String,
        doc_type: String,
        id: Uuid,
    },

    /// The index service rejected the operation
    #[error("Index rejected request with status {status}: {body}")]
    Protocol { status: u16, body: String },

    /// Network-level failure talking to the index
    #[error("Index transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The binding's backend has no hosts configured
    #[error("No index hosts configured")]
    NoHosts,
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Document operations against the search index.
///
/// Bodies are canonical JSON text, serialized by the caller before
/// transmission. Implementations raise [`IndexError::Conflict`] for
/// duplicate creates and report missing documents on delete through
/// [`DeleteOutcome::NotFound`].
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Insert a new document; fails if one already exists
    async fn create_document(&self, target: &DocumentTarget<'_>, body: &str) -> IndexResult<()>;

    /// Replace or partially update an existing document
    async fn update_document(&self, target: &DocumentTarget<'_>, body: &str) -> IndexResult<()>;

    /// Remove a document; a missing document is reported, not raised
    async fn delete_document(&self, target: &DocumentTarget<'_>) -> IndexResult<DeleteOutcome>;
}
