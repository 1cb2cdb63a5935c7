use async_trait::async_trait;
use common::dtos::embedding_response::EmbeddingResponseDto;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use secrecy::{ExposeSecret, Secret};
use tracing::{info, warn};

use crate::{
    configuration::EmbeddingServiceSettings,
    domain::entities::{collection_record::Embeddings, ingest_item::IngestItem},
    ports::embedding_service::{EmbeddingService, EmbeddingServiceError},
};

/// Multipart field carrying the image bytes
pub const IMAGE_FIELD_NAME: &str = "image";

/// Embedding service reached over HTTP
///
/// Each image is posted as a multipart form with a single `image` part. The service
/// answers `{"vector": [...]}` or `{"error": "..."}`.
pub struct EmbeddingHttpRepository {
    client: Client,
    endpoint: String,
    api_key: Option<Secret<String>>,
}

impl EmbeddingHttpRepository {
    pub fn try_new(settings: &EmbeddingServiceSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.timeout()).build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingService for EmbeddingHttpRepository {
    #[tracing::instrument(
        name = "Requesting image embeddings",
        skip(self, item),
        fields(item_id = %item.record_id(), nb_bytes = item.raw_bytes().len())
    )]
    async fn embed(&self, item: &IngestItem) -> Result<Embeddings, EmbeddingServiceError> {
        let part = Part::bytes(item.raw_bytes().to_vec())
            .file_name(item.name().to_string())
            .mime_str(item.mime_type())
            .map_err(|e| {
                EmbeddingServiceError::InvalidRequest(format!(
                    "invalid mime type {}: {}",
                    item.mime_type(),
                    e
                ))
            })?;
        let form = Form::new().part(IMAGE_FIELD_NAME, part);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingServiceError::NetworkFailure(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| EmbeddingServiceError::NetworkFailure(e.to_string()))?;

        match EmbeddingResponseDto::try_parsing(&body) {
            Ok(EmbeddingResponseDto::Vector { vector }) if status.is_success() => {
                if vector.is_empty() {
                    return Err(EmbeddingServiceError::InvalidResponse(
                        "empty embedding vector".to_string(),
                    ));
                }

                info!(dimension = vector.len(), "Received embeddings");
                Ok(vector)
            }
            Ok(EmbeddingResponseDto::Error { error }) => {
                warn!(%status, %error, "Embedding service answered an error");
                Err(EmbeddingServiceError::ServerError(error))
            }
            Ok(EmbeddingResponseDto::Vector { .. }) => Err(EmbeddingServiceError::ServerError(
                format!("unexpected status {} with a vector body", status),
            )),
            Err(_) if !status.is_success() => Err(EmbeddingServiceError::ServerError(format!(
                "{}: {}",
                status,
                String::from_utf8_lossy(&body)
            ))),
            Err(error) => Err(EmbeddingServiceError::InvalidResponse(error.to_string())),
        }
    }
}
