mod activity;
mod assessment;
mod ids;
mod path;
mod record;

pub use ids::{ParseIdError, PathId, ResourceId, TopicName, UserId};
pub use record::{ActivityKey, AssessmentKey, INITIAL_VERSION, PathKey, Versioned};

pub use activity::{Activity, ActivityError, ViewedResources};
pub use assessment::{
    AssessmentError, AssessmentRecord, AssessmentSession, AssessmentState, Difficulty, Exercise,
    Grade, OPTIONS_PER_EXERCISE, QuestionKind,
};
pub use path::{LearningPath, PathError, TopicDefinition};
