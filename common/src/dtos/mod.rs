pub mod embedding_response;
pub mod position_update;
