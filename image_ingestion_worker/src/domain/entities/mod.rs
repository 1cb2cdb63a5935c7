pub mod collection;
pub mod collection_record;
pub mod ingest_item;
