use std::sync::Arc;

use storage::repository::ActivityRepository;
use storage::versioned::{
    RetryOutcome, Update, VersionedStore, ensure_exists, update_with_retry,
};
use study_core::model::{Activity, ActivityKey, ResourceId, Versioned};
use study_core::{BackoffPolicy, Clock};
use tracing::{debug, info};

use crate::error::TrackerError;
use crate::progress_service::{ProgressRefresh, ProgressService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    /// The resource was added; the activity now has `version`.
    Marked { version: i64 },
    /// Already viewed; nothing was written.
    AlreadyMarked,
}

/// Result of a learner viewing a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewReport {
    pub outcome: ViewOutcome,
    /// Present when the view was new and path progress was recomputed.
    pub progress: Option<ProgressRefresh>,
}

/// Idempotent "viewed" marks per (user, path, topic, resource).
pub struct ResourceViewTracker {
    clock: Clock,
    policy: BackoffPolicy,
    activities: Arc<dyn ActivityRepository>,
    progress: Arc<ProgressService>,
}

impl ResourceViewTracker {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: BackoffPolicy,
        activities: Arc<dyn ActivityRepository>,
        progress: Arc<ProgressService>,
    ) -> Self {
        Self {
            clock,
            policy,
            activities,
            progress,
        }
    }

    /// Mark `resource` viewed and, when that changed anything, re-derive
    /// and store the path's progress.
    ///
    /// # Errors
    ///
    /// - `TrackerError::NotFound` if the path does not exist.
    /// - `TrackerError::ConcurrencyExhausted` if writers kept winning the race.
    /// - `TrackerError::Storage` on backend failure.
    pub async fn view(
        &self,
        key: &ActivityKey,
        resource: &ResourceId,
    ) -> Result<ViewReport, TrackerError> {
        let outcome = self.mark_viewed(key, resource).await?;
        let progress = match outcome {
            ViewOutcome::Marked { .. } => Some(self.progress.refresh(&key.path_key()).await?),
            ViewOutcome::AlreadyMarked => None,
        };
        Ok(ViewReport { outcome, progress })
    }

    /// Create the activity row if it does not exist yet and return it.
    ///
    /// A concurrent creation by another caller is not an error.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` on backend failure.
    pub async fn ensure_activity(
        &self,
        key: &ActivityKey,
    ) -> Result<Versioned<Activity>, TrackerError> {
        ensure_exists(&*self.activities, key, &Activity::empty(self.clock.now())).await?;
        self.activities
            .read(key)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("activity {key}")))
    }

    /// Mark `resource` viewed for the activity.
    ///
    /// # Errors
    ///
    /// - `TrackerError::ConcurrencyExhausted` if writers kept winning the race.
    /// - `TrackerError::Storage` on backend failure.
    pub async fn mark_viewed(
        &self,
        key: &ActivityKey,
        resource: &ResourceId,
    ) -> Result<ViewOutcome, TrackerError> {
        let now = self.clock.now();
        ensure_exists(&*self.activities, key, &Activity::empty(now)).await?;

        let outcome =
            update_with_retry(&*self.activities, key, &self.policy, |activity: &Activity| {
                activity
                    .with_viewed(resource, now)
                    .map_or(Update::Skip, Update::Write)
            })
            .await?;

        Ok(match outcome {
            RetryOutcome::Applied(record) => {
                info!(%key, %resource, version = record.version, "resource marked viewed");
                ViewOutcome::Marked {
                    version: record.version,
                }
            }
            RetryOutcome::Unchanged(_) => {
                debug!(%key, %resource, "resource already viewed");
                ViewOutcome::AlreadyMarked
            }
        })
    }

    /// Whether the resource has been viewed. A missing activity means no.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` on backend failure.
    pub async fn is_viewed(
        &self,
        key: &ActivityKey,
        resource: &ResourceId,
    ) -> Result<bool, TrackerError> {
        Ok(self
            .activities
            .read(key)
            .await?
            .is_some_and(|record| record.payload.has_viewed(resource)))
    }
}
