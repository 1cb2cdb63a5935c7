use actix_web::{web::Data, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::handlers::ingestion_queue::IngestionQueue;

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionRecordResponse {
    pub id: String,
    /// Not set while the record has not been projected yet
    pub position: Option<[f32; 3]>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub generation: u64,
    pub records: Vec<CollectionRecordResponse>,
}

/// Current collection, in insertion order
pub async fn get_collection(ingestion_queue: Data<IngestionQueue>) -> HttpResponse {
    let snapshot = ingestion_queue.snapshot().await;

    let response = CollectionResponse {
        generation: snapshot.generation,
        records: snapshot
            .records
            .iter()
            .map(|record| CollectionRecordResponse {
                id: record.id().to_string(),
                position: record.position().map(Into::into),
            })
            .collect(),
    };

    HttpResponse::Ok().json(response)
}
