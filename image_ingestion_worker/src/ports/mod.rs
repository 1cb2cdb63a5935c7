pub mod embedding_service;
pub mod handle_store;
pub mod vector_store;
