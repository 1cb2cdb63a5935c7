use async_trait::async_trait;
use common::helper::error_chain_fmt;

use crate::domain::entities::{collection_record::Embeddings, ingest_item::IngestItem};

/// External service generating the embedding vector of an image
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, item: &IngestItem) -> Result<Embeddings, EmbeddingServiceError>;
}

#[derive(thiserror::Error)]
pub enum EmbeddingServiceError {
    #[error("Embedding service could not be reached: {0}")]
    NetworkFailure(String),
    #[error("Embedding service failed: {0}")]
    ServerError(String),
    #[error("Embedding request could not be built: {0}")]
    InvalidRequest(String),
    #[error("Embedding service answered an invalid response: {0}")]
    InvalidResponse(String),
}

impl std::fmt::Debug for EmbeddingServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
