use std::collections::HashMap;
use std::sync::Arc;

use storage::repository::{ActivityRepository, AssessmentRepository, PathRepository};
use storage::versioned::{Update, VersionedStore, update_with_retry};
use study_core::BackoffPolicy;
use study_core::model::{AssessmentKey, LearningPath, PathKey, TopicName, Versioned};
use study_core::progress::{PathProgressReport, TopicInput, calculate, needs_persist};
use tracing::{debug, info};

use crate::error::TrackerError;

/// A recomputed report and what happened to the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRefresh {
    pub report: PathProgressReport,
    pub previous: f64,
    pub persisted: bool,
    pub version: i64,
}

/// Derives path completion from persisted views and assessments.
pub struct ProgressService {
    policy: BackoffPolicy,
    paths: Arc<dyn PathRepository>,
    activities: Arc<dyn ActivityRepository>,
    assessments: Arc<dyn AssessmentRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        policy: BackoffPolicy,
        paths: Arc<dyn PathRepository>,
        activities: Arc<dyn ActivityRepository>,
        assessments: Arc<dyn AssessmentRepository>,
    ) -> Self {
        Self {
            policy,
            paths,
            activities,
            assessments,
        }
    }

    /// Compute the report without writing anything.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::NotFound` for a missing path, or a storage error.
    pub async fn report(&self, key: &PathKey) -> Result<PathProgressReport, TrackerError> {
        let path = self.load_path(key).await?;
        self.compute(key, &path.payload).await
    }

    /// Recompute and store the path's progress when it moved by more than 0.01.
    ///
    /// # Errors
    ///
    /// - `TrackerError::NotFound` for a missing path.
    /// - `TrackerError::ConcurrencyExhausted` if writers kept winning the race.
    pub async fn refresh(&self, key: &PathKey) -> Result<ProgressRefresh, TrackerError> {
        let path = self.load_path(key).await?;
        let report = self.compute(key, &path.payload).await?;
        let previous = path.payload.progress();
        let computed = report.path_progress;

        if !needs_persist(previous, computed) {
            debug!(%key, previous, computed, "progress unchanged");
            return Ok(ProgressRefresh {
                report,
                previous,
                persisted: false,
                version: path.version,
            });
        }

        let outcome = update_with_retry(&*self.paths, key, &self.policy, |p: &LearningPath| {
            if needs_persist(p.progress(), computed) {
                p.with_progress(computed).map_or(Update::Skip, Update::Write)
            } else {
                Update::Skip
            }
        })
        .await?;

        let persisted = outcome.was_applied();
        let version = outcome.record().version;
        if persisted {
            info!(%key, previous, progress = computed, version, "path progress updated");
        }
        Ok(ProgressRefresh {
            report,
            previous,
            persisted,
            version,
        })
    }

    async fn load_path(&self, key: &PathKey) -> Result<Versioned<LearningPath>, TrackerError> {
        self.paths
            .read(key)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("path {key}")))
    }

    async fn compute(
        &self,
        key: &PathKey,
        path: &LearningPath,
    ) -> Result<PathProgressReport, TrackerError> {
        let activities: HashMap<TopicName, _> = self
            .activities
            .activities_for_path(key)
            .await?
            .into_iter()
            .collect();

        let mut inputs = Vec::with_capacity(path.topics().len());
        for topic in path.topics() {
            let viewed = activities
                .get(&topic.name)
                .map_or(0, |a| a.payload.viewed().count_within(&topic.resources));
            let assessment_key =
                AssessmentKey::new(key.user_id, path.subject(), topic.name.clone());
            let assessment_average = self
                .assessments
                .read(&assessment_key)
                .await?
                .and_then(|record| record.payload.average_score());
            inputs.push(TopicInput {
                name: topic.name.clone(),
                total_resources: topic.resources.len(),
                viewed_resources: viewed,
                assessment_average,
            });
        }
        Ok(calculate(&inputs))
    }
}
