use async_trait::async_trait;
use common::helper::error_chain_fmt;
use serde_json::Value as JsonValue;

use crate::domain::entities::collection_record::ProjectedPosition;

/// External vector store holding the embeddings and computing their 3D projection
///
/// No concurrency contract is given by the store: callers must not overlap calls.
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn insert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &JsonValue,
    ) -> Result<(), VectorStoreError>;

    /// Recomputes the projection of the whole collection
    ///
    /// One entry per stored item, in the store insertion order.
    async fn project_all(&self) -> Result<Vec<(String, ProjectedPosition)>, VectorStoreError>;

    /// Projects a single vector against the current projection basis
    async fn project_one(&self, vector: &[f32]) -> Result<ProjectedPosition, VectorStoreError>;

    async fn clear(&self) -> Result<(), VectorStoreError>;
}

#[derive(thiserror::Error)]
pub enum VectorStoreError {
    #[error("Vector store could not be reached: {0}")]
    Unreachable(String),
    #[error("Vector store rejected the request: {0}")]
    Rejected(String),
    #[error("Vector store answered an invalid response: {0}")]
    InvalidResponse(String),
}

impl std::fmt::Debug for VectorStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
