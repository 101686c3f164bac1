use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ResourceId;
use crate::rounding::round_to;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ActivityError {
    #[error("total minutes must be finite and non-negative, got {0}")]
    InvalidMinutes(f64),
}

/// Set of resources a learner has opened within one topic.
///
/// Membership is idempotent: a resource is either viewed or not, and is
/// never counted twice. Serializes as a sorted JSON array of identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewedResources(BTreeSet<ResourceId>);

impl ViewedResources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, resource: &ResourceId) -> bool {
        self.0.contains(resource)
    }

    /// Add a resource; returns `false` if it was already present.
    pub fn insert(&mut self, resource: ResourceId) -> bool {
        self.0.insert(resource)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceId> {
        self.0.iter()
    }

    /// Count how many of the given resources have been viewed.
    ///
    /// Entries of the set that are not part of `resources` (e.g. a resource
    /// renamed out of the path definition) do not count.
    #[must_use]
    pub fn count_within(&self, resources: &[ResourceId]) -> usize {
        let unique: BTreeSet<&ResourceId> = resources.iter().collect();
        unique.into_iter().filter(|r| self.0.contains(*r)).count()
    }
}

impl FromIterator<ResourceId> for ViewedResources {
    fn from_iter<I: IntoIterator<Item = ResourceId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-(user, path, topic) engagement: which resources were opened and how
/// long the learner has studied the topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    viewed: ViewedResources,
    total_minutes: f64,
    last_active_at: DateTime<Utc>,
}

impl Activity {
    /// A fresh activity with nothing viewed and no time accrued.
    #[must_use]
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            viewed: ViewedResources::new(),
            total_minutes: 0.0,
            last_active_at: now,
        }
    }

    /// Rehydrate an activity from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `ActivityError::InvalidMinutes` for negative or non-finite totals.
    pub fn from_persisted(
        viewed: ViewedResources,
        total_minutes: f64,
        last_active_at: DateTime<Utc>,
    ) -> Result<Self, ActivityError> {
        if !total_minutes.is_finite() || total_minutes < 0.0 {
            return Err(ActivityError::InvalidMinutes(total_minutes));
        }
        Ok(Self {
            viewed,
            total_minutes,
            last_active_at,
        })
    }

    #[must_use]
    pub fn viewed(&self) -> &ViewedResources {
        &self.viewed
    }

    #[must_use]
    pub fn total_minutes(&self) -> f64 {
        self.total_minutes
    }

    #[must_use]
    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    #[must_use]
    pub fn has_viewed(&self, resource: &ResourceId) -> bool {
        self.viewed.contains(resource)
    }

    /// Copy of this activity with `resource` marked viewed, or `None` when it
    /// already was.
    #[must_use]
    pub fn with_viewed(&self, resource: &ResourceId, now: DateTime<Utc>) -> Option<Self> {
        if self.viewed.contains(resource) {
            return None;
        }
        let mut next = self.clone();
        next.viewed.insert(resource.clone());
        next.last_active_at = now;
        Some(next)
    }

    /// Copy of this activity with `minutes` added to the running total.
    ///
    /// Totals are kept at two decimal places, matching the `DECIMAL(10,2)`
    /// column the figures are reported in.
    #[must_use]
    pub fn with_added_minutes(&self, minutes: f64, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.total_minutes = round_to(self.total_minutes + minutes.max(0.0), 2);
        next.last_active_at = now;
        next
    }
}
