use async_trait::async_trait;
use common::helper::error_chain_fmt;

use crate::domain::entities::collection_record::{Embeddings, ProjectedPosition};

/// Durable record of an ingested resource, as stored across sessions
#[derive(Debug, Clone, PartialEq)]
pub struct FileHandleRecord {
    pub id: String,
    /// Opaque reference to the ingested resource
    pub handle: Option<String>,
    pub vector: Option<Embeddings>,
    pub position: Option<ProjectedPosition>,
}

/// Fields written by a `put`
///
/// `None` fields are left untouched on an existing record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHandlePayload {
    pub handle: Option<String>,
    pub vector: Option<Embeddings>,
    pub position: Option<ProjectedPosition>,
}

impl FileHandlePayload {
    /// Identity known, vector unknown
    pub fn identity(handle: impl Into<String>) -> Self {
        Self {
            handle: Some(handle.into()),
            ..Self::default()
        }
    }

    pub fn vector(vector: Embeddings) -> Self {
        Self {
            vector: Some(vector),
            ..Self::default()
        }
    }

    pub fn position(position: ProjectedPosition) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }
}

/// Durable key-value store shadowing the in-memory collection, surviving restarts
#[async_trait]
pub trait HandleStore: Send + Sync {
    /// Upserts the record `id`, atomically for this single record
    async fn put(&self, id: &str, payload: &FileHandlePayload) -> Result<(), HandleStoreError>;

    async fn get(&self, id: &str) -> Result<FileHandleRecord, HandleStoreError>;

    async fn get_all(&self) -> Result<Vec<FileHandleRecord>, HandleStoreError>;

    /// Deletes every record. Idempotent.
    async fn clear(&self) -> Result<(), HandleStoreError>;
}

#[derive(thiserror::Error)]
pub enum HandleStoreError {
    #[error("Durable store is unavailable: {0}")]
    StoreUnavailable(String),
    #[error("No record found for id {0}")]
    NotFound(String),
    #[error("Durable store operation failed: {0}")]
    Backend(String),
    #[error("Stored record {0} could not be decoded")]
    InvalidRecord(String, #[source] serde_json::Error),
}

impl std::fmt::Debug for HandleStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
