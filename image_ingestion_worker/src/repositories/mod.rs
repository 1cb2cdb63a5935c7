pub mod embedding_http_repository;
pub mod file_handle_sqlite_repository;
pub mod vector_store_http_repository;
