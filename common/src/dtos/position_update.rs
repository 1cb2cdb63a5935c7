use serde::{Deserialize, Serialize};

/// Projected position of one collection item, as emitted to presentation
/// and as answered by the vector store for a full reprojection.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PositionUpdateDto {
    pub id: String,
    pub position: [f32; 3],
}
