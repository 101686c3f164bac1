use std::sync::Arc;

use storage::repository::Storage;
use tracing::warn;

use crate::Clock;
use crate::ai::{OpenAiTutor, Tutor};
use crate::analytics::LearningAnalytics;
use crate::assessment_service::AssessmentService;
use crate::config::Config;
use crate::error::AppServicesError;
use crate::path_service::PathService;
use crate::progress_service::ProgressService;
use crate::resource_views::ResourceViewTracker;
use crate::study_timer::StudyTimer;

/// Assembles the tracking services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    paths: Arc<PathService>,
    views: Arc<ResourceViewTracker>,
    timer: Arc<StudyTimer>,
    progress: Arc<ProgressService>,
    assessments: Arc<AssessmentService>,
    analytics: Arc<LearningAnalytics>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(config: &Config, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(&config.database_url, config.pool).await?;
        Ok(Self::from_storage(storage, config, clock, tutor_from(config)))
    }

    /// Build services over volatile in-memory storage.
    #[must_use]
    pub fn in_memory(config: &Config, clock: Clock, tutor: Tutor) -> Self {
        Self::from_storage(Storage::in_memory(), config, clock, tutor)
    }

    #[must_use]
    pub fn from_storage(storage: Storage, config: &Config, clock: Clock, tutor: Tutor) -> Self {
        let policy = config.retry;
        let paths = Arc::new(PathService::new(clock, policy, Arc::clone(&storage.paths)));
        let progress = Arc::new(ProgressService::new(
            policy,
            Arc::clone(&storage.paths),
            Arc::clone(&storage.activities),
            Arc::clone(&storage.assessments),
        ));
        let views = Arc::new(ResourceViewTracker::new(
            clock,
            policy,
            Arc::clone(&storage.activities),
            Arc::clone(&progress),
        ));
        let timer = Arc::new(StudyTimer::new(
            clock,
            policy,
            config.heartbeat,
            Arc::clone(&storage.activities),
        ));
        let assessments = Arc::new(AssessmentService::new(
            clock,
            policy,
            Arc::clone(&storage.assessments),
            Arc::clone(&paths),
            Arc::clone(&progress),
            tutor,
        ));
        let analytics = Arc::new(LearningAnalytics::new(
            Arc::clone(&storage.activities),
            Arc::clone(&storage.assessments),
        ));

        Self {
            paths,
            views,
            timer,
            progress,
            assessments,
            analytics,
        }
    }

    #[must_use]
    pub fn paths(&self) -> Arc<PathService> {
        Arc::clone(&self.paths)
    }

    #[must_use]
    pub fn views(&self) -> Arc<ResourceViewTracker> {
        Arc::clone(&self.views)
    }

    #[must_use]
    pub fn timer(&self) -> Arc<StudyTimer> {
        Arc::clone(&self.timer)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn assessments(&self) -> Arc<AssessmentService> {
        Arc::clone(&self.assessments)
    }

    #[must_use]
    pub fn analytics(&self) -> Arc<LearningAnalytics> {
        Arc::clone(&self.analytics)
    }
}

/// The configured tutor, or a fallback-only one when AI is off or the
/// client cannot be built.
#[must_use]
pub fn tutor_from(config: &Config) -> Tutor {
    let Some(ai) = config.ai.clone() else {
        return Tutor::disabled();
    };
    match OpenAiTutor::new(ai) {
        Ok(client) => Tutor::new(Arc::new(client)),
        Err(err) => {
            warn!(error = %err, "AI tutor unavailable, using fallbacks");
            Tutor::disabled()
        }
    }
}
