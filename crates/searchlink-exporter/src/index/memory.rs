//! In-memory index client for tests and embedded use
//!
//! Stores documents keyed by `(index, doc_type, id)` and enforces the same
//! contract as the HTTP adapter: duplicate creates conflict, updates of
//! missing documents fail with [`IndexError::NotFound`], deletes of missing
//! documents report [`DeleteOutcome::NotFound`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{DeleteOutcome, DocumentTarget, IndexClient, IndexError, IndexResult};

type DocKey = (String, String, Uuid);

/// Index client backed by a process-local document map
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    documents: Arc<Mutex<HashMap<DocKey, serde_json::Value>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> MutexGuard<'_, HashMap<DocKey, serde_json::Value>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(target: &DocumentTarget<'_>) -> DocKey {
        (
            target.index.to_string(),
            target.doc_type.to_string(),
            target.id,
        )
    }

    /// Read a stored document
    pub fn document(&self, index: &str, doc_type: &str, id: Uuid) -> Option<serde_json::Value> {
        self.docs()
            .get(&(index.to_string(), doc_type.to_string(), id))
            .cloned()
    }

    /// Number of stored documents across all indexes
    pub fn len(&self) -> usize {
        self.docs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs().is_empty()
    }
}

#[async_trait]
impl IndexClient for MemoryIndex {
    async fn create_document(&self, target: &DocumentTarget<'_>, body: &str) -> IndexResult<()> {
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|_| IndexError::Protocol {
                status: 400,
                body: "body is not valid JSON".to_string(),
            })?;

        let mut docs = self.docs();
        if docs.contains_key(&Self::key(target)) {
            return Err(IndexError::Conflict {
                index: target.index.to_string(),
                doc_type: target.doc_type.to_string(),
                id: target.id,
            });
        }
        docs.insert(Self::key(target), value);
        Ok(())
    }

    async fn update_document(&self, target: &DocumentTarget<'_>, body: &str) -> IndexResult<()> {
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|_| IndexError::Protocol {
                status: 400,
                body: "body is not valid JSON".to_string(),
            })?;

        let mut docs = self.docs();
        if !docs.contains_key(&Self::key(target)) {
            return Err(IndexError::NotFound {
                index: target.index.to_string(),
                doc_type: target.doc_type.to_string(),
                id: target.id,
            });
        }
        docs.insert(Self::key(target), value);
        Ok(())
    }

    async fn delete_document(&self, target: &DocumentTarget<'_>) -> IndexResult<DeleteOutcome> {
        match self.docs().remove(&Self::key(target)) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}
