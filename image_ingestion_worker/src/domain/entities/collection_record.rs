use common::helper::error_chain_fmt;
use serde::{Deserialize, Serialize};

/// Embedding vector of an image, its dimension is defined by the embedding service
pub type Embeddings = Vec<f32>;

/// 3D coordinate of an item, as projected by the vector store
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ProjectedPosition(pub [f32; 3]);

impl From<[f32; 3]> for ProjectedPosition {
    fn from(coordinates: [f32; 3]) -> Self {
        Self(coordinates)
    }
}

impl From<ProjectedPosition> for [f32; 3] {
    fn from(position: ProjectedPosition) -> Self {
        position.0
    }
}

/// An ingested item of the collection
///
/// A record with a position always has a vector. The opposite is not true while the
/// item has been inserted in the vector store but not yet projected.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    id: String,
    vector: Option<Embeddings>,
    position: Option<ProjectedPosition>,
}

impl CollectionRecord {
    /// Record of a freshly embedded item, not projected yet
    pub fn new(id: String, vector: Embeddings) -> Self {
        Self {
            id,
            vector: Some(vector),
            position: None,
        }
    }

    /// Rebuilds a record from stored parts, ex: from the durable store on session recovery
    pub fn try_from_parts(
        id: String,
        vector: Option<Embeddings>,
        position: Option<ProjectedPosition>,
    ) -> Result<Self, CollectionRecordError> {
        if position.is_some() && vector.is_none() {
            return Err(CollectionRecordError::PositionWithoutVector(id));
        }

        Ok(Self {
            id,
            vector,
            position,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn vector(&self) -> Option<&Embeddings> {
        self.vector.as_ref()
    }

    pub fn position(&self) -> Option<ProjectedPosition> {
        self.position
    }

    pub fn set_position(&mut self, position: ProjectedPosition) -> Result<(), CollectionRecordError> {
        if self.vector.is_none() {
            return Err(CollectionRecordError::PositionWithoutVector(self.id.clone()));
        }

        self.position = Some(position);
        Ok(())
    }
}

#[derive(thiserror::Error)]
pub enum CollectionRecordError {
    #[error("Record {0} cannot have a position without a vector")]
    PositionWithoutVector(String),
}

impl std::fmt::Debug for CollectionRecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
