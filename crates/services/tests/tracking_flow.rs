use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use services::{
    AppServices, CollaboratorError, Config, TickOutcome, TrackerError, Tutor, TutorBackend,
    ValidationError, ViewOutcome,
};
use storage::repository::Storage;
use study_core::model::{
    ActivityKey, AssessmentState, Difficulty, Exercise, Grade, PathKey, QuestionKind, ResourceId,
    TopicDefinition, UserId,
};
use study_core::time::fixed_now;
use study_core::{BackoffPolicy, Clock};

/// Hands out multiple-choice questions whose correct answer is always "a".
struct Scripted;

#[async_trait]
impl TutorBackend for Scripted {
    async fn generate_exercises(
        &self,
        _subject: &str,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Exercise>, CollaboratorError> {
        Ok((0..count)
            .map(|i| Exercise {
                question: format!("{topic} question {i}"),
                kind: QuestionKind::MultipleChoice,
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_option: 0,
                explanation: "a is right".into(),
                difficulty,
                estimated_minutes: 10,
            })
            .collect())
    }

    async fn evaluate_answer(
        &self,
        _subject: &str,
        _topic: &str,
        _question: &str,
        _answer: &str,
        _difficulty: Difficulty,
    ) -> Result<Grade, CollaboratorError> {
        Ok(Grade {
            score: 0.9,
            feedback: "good".into(),
            explanation: String::new(),
        })
    }
}

/// Same questions as `Scripted`, but grades free-text answers far above 1.0.
struct Overgenerous;

#[async_trait]
impl TutorBackend for Overgenerous {
    async fn generate_exercises(
        &self,
        subject: &str,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Exercise>, CollaboratorError> {
        Scripted
            .generate_exercises(subject, topic, difficulty, count)
            .await
    }

    async fn evaluate_answer(
        &self,
        _subject: &str,
        _topic: &str,
        _question: &str,
        _answer: &str,
        _difficulty: Difficulty,
    ) -> Result<Grade, CollaboratorError> {
        Ok(Grade {
            score: 1.5,
            feedback: "outstanding".into(),
            explanation: String::new(),
        })
    }
}

fn config() -> Config {
    Config {
        retry: BackoffPolicy::immediate(3),
        ..Config::default()
    }
}

fn in_memory() -> AppServices {
    AppServices::in_memory(
        &config(),
        Clock::fixed(fixed_now()),
        Tutor::new(Arc::new(Scripted)),
    )
}

async fn two_topic_path(app: &AppServices, user: UserId) -> PathKey {
    let topics = vec![
        TopicDefinition::new("A", vec![ResourceId::new("a1"), ResourceId::new("a2")]),
        TopicDefinition::new("B", vec![ResourceId::new("b1"), ResourceId::new("b2")]),
    ];
    let id = app
        .paths()
        .create_path(user, "Rust", Difficulty::Beginner, topics)
        .await
        .unwrap();
    PathKey::new(user, id)
}

#[tokio::test]
async fn completing_one_of_two_topics_gives_half_progress() {
    let app = in_memory();
    let user = UserId::new(1);
    let path = two_topic_path(&app, user).await;
    let topic_a = ActivityKey::new(user, path.path_id, "A");

    for res in ["a1", "a2"] {
        let outcome = app
            .views()
            .mark_viewed(&topic_a, &ResourceId::new(res))
            .await
            .unwrap();
        assert!(matches!(outcome, ViewOutcome::Marked { .. }));
    }

    let mut session = app.assessments().regenerate(&topic_a, 2).await.unwrap();
    assert_eq!(session.state(), AssessmentState::NotStarted);
    session.set_answer(0, "a").unwrap();
    assert_eq!(session.set_answer(1, "a").unwrap(), AssessmentState::InProgress);

    let report = app.assessments().submit(&topic_a, &mut session).await.unwrap();
    assert_eq!(session.state(), AssessmentState::Submitted);
    assert_eq!(report.average_score, 1.0);
    assert_eq!(report.progress.report.path_progress, 0.5);
    assert!(report.progress.persisted);
    assert_eq!(report.progress.report.completed_topics, 1);
    assert_eq!(report.progress.report.viewed_resources, 2);
    assert_eq!(report.progress.report.total_resources, 4);

    let stored = app.paths().get_path(&path).await.unwrap();
    assert_eq!(stored.payload.progress(), 0.5);
    // create, questions stored, progress written
    assert_eq!(stored.version, 3);

    let reopened = app.assessments().open(&topic_a).await.unwrap();
    assert_eq!(reopened.state(), AssessmentState::Submitted);
    assert_eq!(reopened.average_score(), Some(1.0));
}

#[tokio::test]
async fn viewing_the_last_resource_after_submitting_updates_stored_progress() {
    let app = in_memory();
    let user = UserId::new(8);
    let path = two_topic_path(&app, user).await;
    let topic_a = ActivityKey::new(user, path.path_id, "A");

    let first = app
        .views()
        .view(&topic_a, &ResourceId::new("a1"))
        .await
        .unwrap();
    assert!(matches!(first.outcome, ViewOutcome::Marked { .. }));
    assert!(!first.progress.unwrap().persisted);

    let mut session = app.assessments().regenerate(&topic_a, 1).await.unwrap();
    session.set_answer(0, "a").unwrap();
    let submitted = app.assessments().submit(&topic_a, &mut session).await.unwrap();
    assert_eq!(submitted.average_score, 1.0);
    // half the resources viewed, so the topic is not complete yet
    assert_eq!(submitted.progress.report.path_progress, 0.0);

    let last = app
        .views()
        .view(&topic_a, &ResourceId::new("a2"))
        .await
        .unwrap();
    let refresh = last.progress.unwrap();
    assert!(refresh.persisted);
    assert_eq!(refresh.report.path_progress, 0.5);

    let stored = app.paths().get_path(&path).await.unwrap();
    assert_eq!(stored.payload.progress(), 0.5);

    let again = app
        .views()
        .view(&topic_a, &ResourceId::new("a2"))
        .await
        .unwrap();
    assert_eq!(again.outcome, ViewOutcome::AlreadyMarked);
    assert!(again.progress.is_none());
}

#[tokio::test]
async fn discarding_clears_completion_but_keeps_views() {
    let app = in_memory();
    let user = UserId::new(2);
    let path = two_topic_path(&app, user).await;
    let topic_a = ActivityKey::new(user, path.path_id, "A");

    for res in ["a1", "a2"] {
        app.views()
            .mark_viewed(&topic_a, &ResourceId::new(res))
            .await
            .unwrap();
    }
    let mut session = app.assessments().regenerate(&topic_a, 1).await.unwrap();
    session.set_answer(0, "a").unwrap();
    app.assessments().submit(&topic_a, &mut session).await.unwrap();

    let refresh = app.assessments().discard(&topic_a).await.unwrap();
    assert_eq!(refresh.report.path_progress, 0.0);
    assert!(refresh.persisted);
    assert!(app
        .views()
        .is_viewed(&topic_a, &ResourceId::new("a1"))
        .await
        .unwrap());

    let reopened = app.assessments().open(&topic_a).await.unwrap();
    assert_eq!(reopened.state(), AssessmentState::NotStarted);
}

#[tokio::test]
async fn partial_submission_writes_nothing() {
    let app = in_memory();
    let user = UserId::new(3);
    let path = two_topic_path(&app, user).await;
    let topic_b = ActivityKey::new(user, path.path_id, "B");

    let mut session = app.assessments().regenerate(&topic_b, 5).await.unwrap();
    for i in 0..4 {
        session.set_answer(i, "b").unwrap();
    }

    let err = app
        .assessments()
        .submit(&topic_b, &mut session)
        .await
        .unwrap_err();
    match err {
        TrackerError::Validation(ValidationError::UnansweredQuestions { missing }) => {
            assert_eq!(missing, vec![4]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.state(), AssessmentState::InProgress);

    let reopened = app.assessments().open(&topic_b).await.unwrap();
    assert_eq!(reopened.state(), AssessmentState::NotStarted);
    let stored = app.paths().get_path(&path).await.unwrap();
    assert_eq!(stored.payload.progress(), 0.0);
}

#[tokio::test]
async fn open_without_questions_generates_them() {
    let app = in_memory();
    let user = UserId::new(4);
    let path = two_topic_path(&app, user).await;
    let topic_b = ActivityKey::new(user, path.path_id, "B");

    let session = app.assessments().open(&topic_b).await.unwrap();
    assert_eq!(session.questions().len(), 3);

    let stored = app.paths().get_path(&path).await.unwrap();
    assert_eq!(stored.payload.topics()[1].questions.len(), 3);
}

#[tokio::test]
async fn open_ended_answers_are_graded_by_the_tutor() {
    let app = in_memory();
    let user = UserId::new(5);
    let path = two_topic_path(&app, user).await;
    let topic_a = ActivityKey::new(user, path.path_id, "A");

    let mut session = app.assessments().regenerate(&topic_a, 1).await.unwrap();
    session.set_answer(0, "it depends on the borrow checker").unwrap();
    let report = app.assessments().submit(&topic_a, &mut session).await.unwrap();
    assert_eq!(report.average_score, 0.9);
    // no resources viewed, so the topic is not complete
    assert_eq!(report.progress.report.path_progress, 0.0);
    assert!(!report.progress.persisted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_heartbeats_all_land() {
    const WRITERS: usize = 8;
    let app = AppServices::in_memory(
        &Config {
            retry: BackoffPolicy::immediate(64),
            ..Config::default()
        },
        Clock::fixed(fixed_now()),
        Tutor::disabled(),
    );
    let user = UserId::new(6);
    let path = two_topic_path(&app, user).await;
    let key = ActivityKey::new(user, path.path_id, "A");
    app.timer().init(key.clone()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..WRITERS {
        let timer = app.timer();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            let mut session = timer.init(key).await.unwrap();
            timer.tick(&mut session, fixed_now()).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().outcome, TickOutcome::Recorded);
    }

    let record = app.views().ensure_activity(&key).await.unwrap();
    assert_eq!(record.version, 1 + WRITERS as i64);
    assert!((record.payload.total_minutes() - 0.17 * WRITERS as f64).abs() < 1e-9);
}

#[tokio::test]
async fn out_of_range_tutor_scores_never_reach_storage() {
    let config = Config {
        database_url: "sqlite:file:services_out_of_range?mode=memory&cache=shared".into(),
        retry: BackoffPolicy::immediate(3),
        ..Config::default()
    };
    let storage = Storage::sqlite(&config.database_url, config.pool)
        .await
        .unwrap();
    let app = AppServices::from_storage(
        storage,
        &config,
        Clock::fixed(fixed_now()),
        Tutor::new(Arc::new(Overgenerous)),
    );
    let user = UserId::new(9);
    let path = two_topic_path(&app, user).await;
    let topic_a = ActivityKey::new(user, path.path_id, "A");

    let mut session = app.assessments().regenerate(&topic_a, 1).await.unwrap();
    session.set_answer(0, "a free-text answer").unwrap();
    let report = app.assessments().submit(&topic_a, &mut session).await.unwrap();
    assert_eq!(report.average_score, 0.0);

    let reopened = app.assessments().open(&topic_a).await.unwrap();
    assert_eq!(reopened.state(), AssessmentState::Submitted);
    assert_eq!(reopened.average_score(), Some(0.0));
    app.progress().report(&path).await.unwrap();
    app.analytics().summary(user).await.unwrap();
}

#[tokio::test]
async fn sqlite_backed_session_end_to_end() {
    let config = Config {
        database_url: "sqlite:file:services_end_to_end?mode=memory&cache=shared".into(),
        retry: BackoffPolicy::immediate(3),
        ..Config::default()
    };
    let app = AppServices::new_sqlite(&config, Clock::fixed(fixed_now()))
        .await
        .unwrap();
    let user = UserId::new(7);
    let path = two_topic_path(&app, user).await;
    let key = ActivityKey::new(user, path.path_id, "A");

    let timer = app.timer();
    let mut session = timer.init(key.clone()).await.unwrap();
    let start = fixed_now();
    let mut last = None;
    for step in 0..3 {
        last = Some(
            timer
                .tick(&mut session, start + Duration::seconds(10 * step))
                .await
                .unwrap(),
        );
    }
    let last = last.unwrap();
    assert_eq!(last.topic_minutes, 0.51);
    assert_eq!(last.user_minutes, 0.51);
    assert_eq!(last.version, 4);

    app.views()
        .mark_viewed(&key, &ResourceId::new("a1"))
        .await
        .unwrap();
    let report = app.progress().report(&path).await.unwrap();
    assert_eq!(report.viewed_resources, 1);
    assert_eq!(report.path_progress, 0.0);

    let summary = app.analytics().summary(user).await.unwrap();
    assert_eq!(summary.total_minutes, 0.51);
    assert!(summary.strong_topics.is_empty());
}
