#![forbid(unsafe_code)]

pub mod ai;
pub mod analytics;
pub mod app_services;
pub mod assessment_service;
pub mod config;
pub mod error;
pub mod path_service;
pub mod progress_service;
pub mod resource_views;
pub mod study_timer;

pub use study_core::Clock;

pub use ai::{OpenAiTutor, Tutor, TutorBackend};
pub use analytics::{LearningAnalytics, LearningSummary};
pub use app_services::AppServices;
pub use assessment_service::{AssessmentService, SubmitReport};
pub use config::{AiConfig, Config, ConfigError};
pub use error::{AppServicesError, CollaboratorError, TrackerError, ValidationError};
pub use path_service::PathService;
pub use progress_service::{ProgressRefresh, ProgressService};
pub use resource_views::{ResourceViewTracker, ViewOutcome, ViewReport};
pub use study_timer::{Beat, StudyTimer, TickOutcome, TickReport};
