use serde::{Deserialize, Serialize};

use crate::helper::error_chain_fmt;

/// Body returned by the embedding service for one image
///
/// A successful call answers `{"vector": [...]}`, a failed one `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EmbeddingResponseDto {
    Vector { vector: Vec<f32> },
    Error { error: String },
}

impl EmbeddingResponseDto {
    pub fn try_parsing(data: &[u8]) -> Result<Self, EmbeddingResponseDtoError> {
        let data = std::str::from_utf8(data)?;
        let response = serde_json::from_str(data)
            .map_err(|e| EmbeddingResponseDtoError::InvalidJsonData(e, data.to_string()))?;

        Ok(response)
    }
}

#[derive(thiserror::Error)]
pub enum EmbeddingResponseDtoError {
    #[error("Data could not be converted from utf8 u8 vector to string")]
    InvalidStringData(#[from] std::str::Utf8Error),

    #[error("Data did not represent a valid embedding response: {0}. Data: {1}")]
    InvalidJsonData(serde_json::Error, String),
}

impl std::fmt::Debug for EmbeddingResponseDtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
