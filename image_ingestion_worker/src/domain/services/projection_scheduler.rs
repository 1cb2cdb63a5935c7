use common::helper::error_chain_fmt;
use serde::{Deserialize, Serialize};

/// Collection sizes at which the whole collection is reprojected
///
/// Frequent while the collection is tiny, sparse once it grows.
pub const DEFAULT_MILESTONES: [usize; 11] = [1, 2, 3, 10, 20, 50, 100, 250, 500, 750, 1000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionDecision {
    /// Recompute the projection of every item of the collection
    FullReprojection,
    /// Only project the item just inserted, against the existing projection basis
    Incremental,
}

/// Decides how the item just inserted in the vector store gets projected
///
/// Pure: the decision only depends on the collection size after the insert
/// and on the milestone table fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionScheduler {
    milestones: Vec<usize>,
}

impl Default for ProjectionScheduler {
    fn default() -> Self {
        Self {
            milestones: DEFAULT_MILESTONES.to_vec(),
        }
    }
}

impl ProjectionScheduler {
    /// Builds a scheduler from a milestone table
    ///
    /// The table must be strictly ascending (sorted, without duplicates) and must not contain 0.
    pub fn try_new(milestones: Vec<usize>) -> Result<Self, ProjectionSchedulerError> {
        if milestones.first() == Some(&0) {
            return Err(ProjectionSchedulerError::InvalidMilestones(
                "a milestone of 0 can never be reached".to_string(),
            ));
        }

        if let Some(pair) = milestones.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(ProjectionSchedulerError::InvalidMilestones(format!(
                "milestones must be strictly ascending, found {} followed by {}",
                pair[0], pair[1]
            )));
        }

        Ok(Self { milestones })
    }

    pub fn milestones(&self) -> &[usize] {
        &self.milestones
    }

    pub fn decide(
        &self,
        count_after_insert: usize,
    ) -> Result<ProjectionDecision, ProjectionSchedulerError> {
        if count_after_insert == 0 {
            return Err(ProjectionSchedulerError::InvalidCount(count_after_insert));
        }

        if self.milestones.binary_search(&count_after_insert).is_ok() {
            Ok(ProjectionDecision::FullReprojection)
        } else {
            Ok(ProjectionDecision::Incremental)
        }
    }
}

#[derive(thiserror::Error)]
pub enum ProjectionSchedulerError {
    #[error("A collection holds at least the item just inserted, got a count of {0}")]
    InvalidCount(usize),
    #[error("Invalid milestone table: {0}")]
    InvalidMilestones(String),
}

impl std::fmt::Debug for ProjectionSchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
