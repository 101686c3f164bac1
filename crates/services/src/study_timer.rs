use std::sync::Arc;

use chrono::{DateTime, Utc};
use storage::repository::ActivityRepository;
use storage::versioned::{Update, VersionedStore, ensure_exists, update_with_retry};
use study_core::model::{Activity, ActivityKey, UserId, Versioned};
use study_core::rounding::round_to;
use study_core::timer::{Heartbeat, TimerSession, validate_minutes};
use study_core::{BackoffPolicy, Clock};
use tracing::{debug, warn};

use crate::error::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Minutes were added to the activity.
    Recorded,
    /// Too soon after the last accepted tick; nothing was written.
    Coalesced,
}

/// What a heartbeat did, with the persisted figures after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub topic_minutes: f64,
    pub user_minutes: f64,
    pub version: i64,
}

/// A heartbeat as seen by a long-running caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Beat {
    Ticked(TickReport),
    /// Other writers kept winning; nothing was added this time.
    Conflicted { attempts: u32, user_minutes: f64 },
}

/// Heartbeat-driven study time accrual.
pub struct StudyTimer {
    clock: Clock,
    policy: BackoffPolicy,
    heartbeat: Heartbeat,
    activities: Arc<dyn ActivityRepository>,
}

impl StudyTimer {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: BackoffPolicy,
        heartbeat: Heartbeat,
        activities: Arc<dyn ActivityRepository>,
    ) -> Self {
        Self {
            clock,
            policy,
            heartbeat,
            activities,
        }
    }

    #[must_use]
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    /// Start timing an activity, creating its row if needed.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` on backend failure.
    pub async fn init(&self, key: ActivityKey) -> Result<TimerSession, TrackerError> {
        ensure_exists(&*self.activities, &key, &Activity::empty(self.clock.now())).await?;
        Ok(TimerSession::new(key))
    }

    /// Report a heartbeat at `now`.
    ///
    /// Within one heartbeat interval of the last accepted tick the call is
    /// coalesced and only reads. On `ConcurrencyExhausted` the session is left
    /// as it was, so the next heartbeat tries again.
    ///
    /// # Errors
    ///
    /// - `TrackerError::Validation` if the configured interval is worth less
    ///   than the minimum tick.
    /// - `TrackerError::ConcurrencyExhausted` if writers kept winning the race.
    /// - `TrackerError::NotFound` if the activity disappeared.
    pub async fn tick(
        &self,
        session: &mut TimerSession,
        now: DateTime<Utc>,
    ) -> Result<TickReport, TrackerError> {
        let key = session.key().clone();

        if !self.heartbeat.is_due(session.last_accepted(), now) {
            let current = self.read(&key).await?;
            debug!(%key, "heartbeat coalesced");
            return self.report(TickOutcome::Coalesced, &key, &current).await;
        }

        let minutes = validate_minutes(self.heartbeat.minutes_per_tick())?;
        let record = match self.apply_minutes(&key, minutes, now).await {
            Ok(record) => record,
            Err(err) => {
                if err.is_retryable() {
                    warn!(%key, error = %err, "heartbeat not recorded");
                }
                return Err(err);
            }
        };
        session.mark_accepted(now);
        self.report(TickOutcome::Recorded, &key, &record).await
    }

    /// Like [`StudyTimer::tick`], but a lost write race is reported with the
    /// last known user total instead of failing.
    ///
    /// # Errors
    ///
    /// Same as [`StudyTimer::tick`] except `TrackerError::ConcurrencyExhausted`.
    pub async fn beat(
        &self,
        session: &mut TimerSession,
        now: DateTime<Utc>,
    ) -> Result<Beat, TrackerError> {
        match self.tick(session, now).await {
            Ok(report) => Ok(Beat::Ticked(report)),
            Err(TrackerError::ConcurrencyExhausted { attempts }) => {
                let user_minutes = self.total_for_user(session.key().user_id).await?;
                Ok(Beat::Conflicted {
                    attempts,
                    user_minutes,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Add an explicit number of minutes to an existing activity.
    ///
    /// # Errors
    ///
    /// - `TrackerError::Validation` when `minutes` rounds below 0.01.
    /// - `TrackerError::NotFound` when the activity does not exist.
    /// - `TrackerError::ConcurrencyExhausted` if writers kept winning the race.
    pub async fn add_minutes(
        &self,
        key: &ActivityKey,
        minutes: f64,
    ) -> Result<Versioned<Activity>, TrackerError> {
        let minutes = validate_minutes(minutes)?;
        self.apply_minutes(key, minutes, self.clock.now()).await
    }

    /// Total study minutes over all of the user's activities.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` on backend failure.
    pub async fn total_for_user(&self, user_id: UserId) -> Result<f64, TrackerError> {
        let total = self.activities.total_minutes_for_user(user_id).await?;
        Ok(round_to(total, 2))
    }

    async fn apply_minutes(
        &self,
        key: &ActivityKey,
        minutes: f64,
        now: DateTime<Utc>,
    ) -> Result<Versioned<Activity>, TrackerError> {
        let outcome =
            update_with_retry(&*self.activities, key, &self.policy, |activity: &Activity| {
                Update::Write(activity.with_added_minutes(minutes, now))
            })
            .await
        .map_err(|e| match TrackerError::from(e) {
            TrackerError::NotFound(_) => TrackerError::NotFound(format!("activity {key}")),
            other => other,
        })?;
        Ok(outcome.into_record())
    }

    async fn read(&self, key: &ActivityKey) -> Result<Versioned<Activity>, TrackerError> {
        self.activities
            .read(key)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("activity {key}")))
    }

    async fn report(
        &self,
        outcome: TickOutcome,
        key: &ActivityKey,
        record: &Versioned<Activity>,
    ) -> Result<TickReport, TrackerError> {
        Ok(TickReport {
            outcome,
            topic_minutes: record.payload.total_minutes(),
            user_minutes: self.total_for_user(key.user_id).await?,
            version: record.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use storage::repository::{InMemoryRepository, StorageError};
    use storage::versioned::{InsertOutcome, WriteOutcome};
    use study_core::model::{PathId, PathKey, TopicName};
    use study_core::time::fixed_now;

    use crate::error::ValidationError;

    /// Activity store where some other writer always got there first.
    struct Contended(InMemoryRepository);

    #[async_trait]
    impl VersionedStore<ActivityKey, Activity> for Contended {
        async fn read(
            &self,
            key: &ActivityKey,
        ) -> Result<Option<Versioned<Activity>>, StorageError> {
            self.0.read(key).await
        }

        async fn try_write(
            &self,
            _: &ActivityKey,
            _: &Activity,
            _: i64,
        ) -> Result<WriteOutcome, StorageError> {
            Ok(WriteOutcome::Stale)
        }

        async fn insert_if_absent(
            &self,
            key: &ActivityKey,
            payload: &Activity,
        ) -> Result<InsertOutcome, StorageError> {
            self.0.insert_if_absent(key, payload).await
        }
    }

    #[async_trait]
    impl ActivityRepository for Contended {
        async fn activities_for_path(
            &self,
            key: &PathKey,
        ) -> Result<Vec<(TopicName, Versioned<Activity>)>, StorageError> {
            self.0.activities_for_path(key).await
        }

        async fn list_for_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<(ActivityKey, Versioned<Activity>)>, StorageError> {
            ActivityRepository::list_for_user(&self.0, user_id).await
        }

        async fn total_minutes_for_user(&self, user_id: UserId) -> Result<f64, StorageError> {
            self.0.total_minutes_for_user(user_id).await
        }
    }

    fn timer_with(heartbeat: Heartbeat) -> StudyTimer {
        StudyTimer::new(
            Clock::fixed(fixed_now()),
            BackoffPolicy::immediate(3),
            heartbeat,
            Arc::new(InMemoryRepository::new()),
        )
    }

    fn key() -> ActivityKey {
        ActivityKey::new(UserId::new(9), PathId::new(1), "Lifetimes")
    }

    #[tokio::test]
    async fn ticks_inside_interval_coalesce_to_one_write() {
        let timer = timer_with(Heartbeat::default());
        let mut session = timer.init(key()).await.unwrap();
        let start = fixed_now();

        let first = timer.tick(&mut session, start).await.unwrap();
        assert_eq!(first.outcome, TickOutcome::Recorded);
        assert_eq!(first.topic_minutes, 0.17);
        assert_eq!(first.version, 2);

        let second = timer
            .tick(&mut session, start + Duration::seconds(4))
            .await
            .unwrap();
        assert_eq!(second.outcome, TickOutcome::Coalesced);
        assert_eq!(second.topic_minutes, first.topic_minutes);
        assert_eq!(second.version, 2);

        let third = timer
            .tick(&mut session, start + Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(third.outcome, TickOutcome::Recorded);
        assert_eq!(third.topic_minutes, 0.34);
        assert_eq!(third.user_minutes, 0.34);
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let timer = timer_with(Heartbeat::default());
        let mut session = timer.init(key()).await.unwrap();
        timer.tick(&mut session, fixed_now()).await.unwrap();

        let again = timer.init(key()).await.unwrap();
        assert_eq!(again.key(), session.key());
        assert_eq!(timer.total_for_user(UserId::new(9)).await.unwrap(), 0.17);
    }

    #[tokio::test]
    async fn sub_minimum_heartbeat_is_rejected_before_writing() {
        let timer = timer_with(Heartbeat::new(Duration::milliseconds(200)).unwrap());
        let mut session = timer.init(key()).await.unwrap();

        let err = timer.tick(&mut session, fixed_now()).await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Validation(ValidationError::TickBelowMinimum { .. })
        ));
        assert_eq!(session.last_accepted(), None);
        assert_eq!(timer.read(&key()).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn tick_without_init_reports_not_found() {
        let timer = timer_with(Heartbeat::default());
        let mut session = TimerSession::new(key());
        let err = timer.tick(&mut session, fixed_now()).await.unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(_)));
    }

    #[tokio::test]
    async fn lost_write_race_is_reported_not_fatal() {
        let repo = InMemoryRepository::new();
        let other = ActivityKey::new(UserId::new(9), PathId::new(2), "Traits");
        ensure_exists(&repo, &other, &Activity::empty(fixed_now()))
            .await
            .unwrap();
        update_with_retry(&repo, &other, &BackoffPolicy::immediate(1), |a: &Activity| {
            Update::Write(a.with_added_minutes(0.5, fixed_now()))
        })
        .await
        .unwrap();

        let timer = StudyTimer::new(
            Clock::fixed(fixed_now()),
            BackoffPolicy::immediate(3),
            Heartbeat::default(),
            Arc::new(Contended(repo)),
        );
        let mut session = timer.init(key()).await.unwrap();

        let beat = timer.beat(&mut session, fixed_now()).await.unwrap();
        assert_eq!(
            beat,
            Beat::Conflicted {
                attempts: 3,
                user_minutes: 0.5
            }
        );
        assert_eq!(session.last_accepted(), None);

        let err = timer.tick(&mut session, fixed_now()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn beat_wraps_successful_ticks() {
        let timer = timer_with(Heartbeat::default());
        let mut session = timer.init(key()).await.unwrap();
        let Beat::Ticked(report) = timer.beat(&mut session, fixed_now()).await.unwrap() else {
            panic!("expected a recorded tick");
        };
        assert_eq!(report.outcome, TickOutcome::Recorded);
        assert_eq!(report.user_minutes, 0.17);
    }

    #[tokio::test]
    async fn explicit_minutes_are_rounded() {
        let timer = timer_with(Heartbeat::default());
        timer.init(key()).await.unwrap();
        let record = timer.add_minutes(&key(), 1.234).await.unwrap();
        assert_eq!(record.payload.total_minutes(), 1.23);
        assert!(timer.add_minutes(&key(), 0.001).await.is_err());
    }
}
