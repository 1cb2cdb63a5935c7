use std::collections::HashMap;

use common::helper::error_chain_fmt;

use super::collection_record::{CollectionRecord, CollectionRecordError, ProjectedPosition};

/// In-memory collection of ingested items, authoritative for the current session
///
/// Records are kept in insertion order. Ids are unique within a generation,
/// and the generation is incremented each time the collection is cleared.
#[derive(Debug, Default)]
pub struct Collection {
    generation: u64,
    records: Vec<CollectionRecord>,
    index_by_id: HashMap<String, usize>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CollectionRecord> {
        self.index_by_id.get(id).map(|&index| &self.records[index])
    }

    pub fn records(&self) -> &[CollectionRecord] {
        &self.records
    }

    pub fn insert(&mut self, record: CollectionRecord) -> Result<(), CollectionError> {
        if self.contains(record.id()) {
            return Err(CollectionError::DuplicateId(record.id().to_string()));
        }

        self.index_by_id
            .insert(record.id().to_string(), self.records.len());
        self.records.push(record);

        Ok(())
    }

    pub fn set_position(
        &mut self,
        id: &str,
        position: ProjectedPosition,
    ) -> Result<(), CollectionError> {
        let index = *self
            .index_by_id
            .get(id)
            .ok_or_else(|| CollectionError::UnknownId(id.to_string()))?;

        self.records[index].set_position(position)?;
        Ok(())
    }

    /// Removes a single record, keeping the order of the others
    pub fn remove(&mut self, id: &str) -> Option<CollectionRecord> {
        let index = self.index_by_id.remove(id)?;
        let record = self.records.remove(index);

        for shifted in &self.records[index..] {
            if let Some(shifted_index) = self.index_by_id.get_mut(shifted.id()) {
                *shifted_index -= 1;
            }
        }

        Some(record)
    }

    /// Removes every record and starts a new generation
    pub fn clear(&mut self) {
        self.records.clear();
        self.index_by_id.clear();
        self.generation += 1;
    }
}

#[derive(thiserror::Error)]
pub enum CollectionError {
    #[error("Id {0} is already part of the current collection generation")]
    DuplicateId(String),
    #[error("Id {0} is not part of the collection")]
    UnknownId(String),
    #[error(transparent)]
    CollectionRecordError(#[from] CollectionRecordError),
}

impl std::fmt::Debug for CollectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
