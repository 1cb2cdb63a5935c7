use actix_multipart::form::{tempfile::TempFile, MultipartForm};
use actix_web::{http::StatusCode, web::Data, HttpResponse, ResponseError};
use common::helper::error_chain_fmt;
use tracing::info;
use uuid::Uuid;

use crate::{
    domain::entities::ingest_item::ImageFile,
    handlers::ingestion_queue::{EnqueueError, EnqueuedItem, IngestionQueue},
};

#[derive(Debug, MultipartForm)]
pub struct UploadForm {
    #[multipart(rename = "file")]
    files: Vec<TempFile>,
}

#[derive(thiserror::Error)]
pub enum AddImagesError {
    #[error("Uploaded file could not be read")]
    ReadError(#[from] std::io::Error),
    #[error(transparent)]
    EnqueueError(#[from] EnqueueError),
}

impl std::fmt::Debug for AddImagesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for AddImagesError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ReadError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::EnqueueError(EnqueueError::BacklogFull(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Enqueues every uploaded file, in upload order
///
/// Responds before any file is processed, with the sequence index and id of each file.
/// Non-image files are accepted here and skipped by the pipeline.
#[tracing::instrument(name = "Adding images", skip(form, ingestion_queue))]
pub async fn add_images(
    form: MultipartForm<UploadForm>,
    ingestion_queue: Data<IngestionQueue>,
) -> Result<HttpResponse, AddImagesError> {
    let UploadForm { files } = form.into_inner();
    let mut enqueued: Vec<EnqueuedItem> = Vec::with_capacity(files.len());

    for file in files {
        let raw_bytes = tokio::fs::read(file.file.path()).await?;
        let mime_type = file
            .content_type
            .as_ref()
            .map(|mime| mime.to_string())
            .unwrap_or_default();
        let name = file
            .file_name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        enqueued.push(ingestion_queue.enqueue(ImageFile {
            name,
            raw_bytes,
            mime_type,
        })?);
    }

    info!(nb_files = enqueued.len(), "Enqueued uploaded files");
    Ok(HttpResponse::Accepted().json(enqueued))
}
