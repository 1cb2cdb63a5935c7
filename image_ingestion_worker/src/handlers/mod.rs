pub mod handler_pipeline_events;
pub mod ingestion_queue;
