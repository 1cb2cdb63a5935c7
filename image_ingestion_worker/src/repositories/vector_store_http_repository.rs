use async_trait::async_trait;
use common::dtos::position_update::PositionUpdateDto;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::{
    configuration::VectorStoreSettings,
    domain::entities::collection_record::ProjectedPosition,
    ports::vector_store::{VectorStoreClient, VectorStoreError},
};

/// Remote vector store, reached over HTTP with JSON bodies
///
/// - `POST /points`: inserts a point
/// - `GET /projections`: projects every point
/// - `POST /projections`: projects a single vector
/// - `DELETE /points`: removes every point
pub struct VectorStoreHttpRepository {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsertPointRequest {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: JsonValue,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectVectorRequest {
    pub vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectVectorResponse {
    pub position: [f32; 3],
}

impl VectorStoreHttpRepository {
    pub fn try_new(settings: &VectorStoreSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.timeout()).build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl VectorStoreClient for VectorStoreHttpRepository {
    #[tracing::instrument(name = "Inserting point in vector store", skip(self, vector, metadata))]
    async fn insert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &JsonValue,
    ) -> Result<(), VectorStoreError> {
        let request = InsertPointRequest {
            id: id.to_string(),
            vector: vector.to_vec(),
            metadata: metadata.clone(),
        };

        let response = self
            .client
            .post(self.url("points"))
            .json(&request)
            .send()
            .await
            .map_err(|e| VectorStoreError::Unreachable(e.to_string()))?;
        ensure_success(response).await?;

        Ok(())
    }

    #[tracing::instrument(name = "Projecting every point", skip(self))]
    async fn project_all(&self) -> Result<Vec<(String, ProjectedPosition)>, VectorStoreError> {
        let response = self
            .client
            .get(self.url("projections"))
            .send()
            .await
            .map_err(|e| VectorStoreError::Unreachable(e.to_string()))?;

        let projections: Vec<PositionUpdateDto> = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| VectorStoreError::InvalidResponse(e.to_string()))?;

        info!("Projected {} points", projections.len());

        Ok(projections
            .into_iter()
            .map(|projection| (projection.id, projection.position.into()))
            .collect())
    }

    #[tracing::instrument(name = "Projecting a single vector", skip(self, vector))]
    async fn project_one(&self, vector: &[f32]) -> Result<ProjectedPosition, VectorStoreError> {
        let request = ProjectVectorRequest {
            vector: vector.to_vec(),
        };

        let response = self
            .client
            .post(self.url("projections"))
            .json(&request)
            .send()
            .await
            .map_err(|e| VectorStoreError::Unreachable(e.to_string()))?;

        let projection: ProjectVectorResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| VectorStoreError::InvalidResponse(e.to_string()))?;

        Ok(projection.position.into())
    }

    #[tracing::instrument(name = "Clearing vector store", skip(self))]
    async fn clear(&self) -> Result<(), VectorStoreError> {
        let response = self
            .client
            .delete(self.url("points"))
            .send()
            .await
            .map_err(|e| VectorStoreError::Unreachable(e.to_string()))?;
        ensure_success(response).await?;

        Ok(())
    }
}

/// Turns a non-2xx response into a `Rejected` error carrying the status and body
async fn ensure_success(response: Response) -> Result<Response, VectorStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(VectorStoreError::Rejected(format!("{}: {}", status, body)))
}
