use actix_web::{web::Data, HttpResponse, ResponseError};

use crate::handlers::ingestion_queue::{IngestionQueue, ResetError};

impl ResponseError for ResetError {}

/// Clears the whole collection, once the item being processed (if any) is done
#[tracing::instrument(name = "Resetting collection on request", skip(ingestion_queue))]
pub async fn reset_collection(
    ingestion_queue: Data<IngestionQueue>,
) -> Result<HttpResponse, ResetError> {
    ingestion_queue.reset().await?;

    Ok(HttpResponse::Ok().finish())
}
