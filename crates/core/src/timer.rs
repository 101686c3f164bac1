use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::model::ActivityKey;
use crate::rounding::round_to;

/// Default client heartbeat cadence.
pub const HEARTBEAT_INTERVAL_SECS: i64 = 10;

/// Smallest delta, in minutes, a tick may add.
pub const MIN_TICK_MINUTES: f64 = 0.01;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum TimerError {
    #[error("tick of {minutes} minutes is below the {MIN_TICK_MINUTES} minimum")]
    BelowMinimum { minutes: f64 },

    #[error("heartbeat interval must be positive")]
    NonPositiveInterval,
}

/// Heartbeat cadence and the minutes each accepted tick is worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    interval: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::seconds(HEARTBEAT_INTERVAL_SECS),
        }
    }
}

impl Heartbeat {
    /// # Errors
    ///
    /// Returns `TimerError::NonPositiveInterval` for a zero or negative interval.
    pub fn new(interval: Duration) -> Result<Self, TimerError> {
        if interval <= Duration::zero() {
            return Err(TimerError::NonPositiveInterval);
        }
        Ok(Self { interval })
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Minutes credited per tick, rounded to two decimals (10s -> 0.17).
    #[must_use]
    pub fn minutes_per_tick(&self) -> f64 {
        round_to(self.interval.num_milliseconds() as f64 / 60_000.0, 2)
    }

    /// Whether enough time passed since `last` for a new tick to be written.
    #[must_use]
    pub fn is_due(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last {
            None => true,
            Some(last) => now - last >= self.interval,
        }
    }
}

/// Round a delta to two decimals and reject anything under the minimum.
///
/// # Errors
///
/// Returns `TimerError::BelowMinimum` when the rounded delta is below
/// [`MIN_TICK_MINUTES`] or not finite.
pub fn validate_minutes(minutes: f64) -> Result<f64, TimerError> {
    let rounded = round_to(minutes, 2);
    if !rounded.is_finite() || rounded < MIN_TICK_MINUTES {
        return Err(TimerError::BelowMinimum { minutes });
    }
    Ok(rounded)
}

/// Per-session heartbeat state: which activity is being timed and when the
/// last tick was accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerSession {
    key: ActivityKey,
    last_accepted: Option<DateTime<Utc>>,
}

impl TimerSession {
    #[must_use]
    pub fn new(key: ActivityKey) -> Self {
        Self {
            key,
            last_accepted: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> &ActivityKey {
        &self.key
    }

    #[must_use]
    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }

    pub fn mark_accepted(&mut self, at: DateTime<Utc>) {
        self.last_accepted = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PathId, UserId};
    use crate::time::fixed_now;

    #[test]
    fn default_tick_is_seventeen_hundredths() {
        assert_eq!(Heartbeat::default().minutes_per_tick(), 0.17);
    }

    #[test]
    fn ticks_inside_interval_are_not_due() {
        let beat = Heartbeat::default();
        let start = fixed_now();
        assert!(beat.is_due(None, start));
        assert!(!beat.is_due(Some(start), start + Duration::seconds(9)));
        assert!(beat.is_due(Some(start), start + Duration::seconds(10)));
    }

    #[test]
    fn sub_minimum_delta_is_rejected() {
        assert!(validate_minutes(0.004).is_err());
        assert_eq!(validate_minutes(0.005).unwrap(), 0.01);
        assert_eq!(validate_minutes(10.0 / 60.0).unwrap(), 0.17);
    }

    #[test]
    fn session_remembers_last_tick() {
        let mut session = TimerSession::new(ActivityKey::new(UserId::new(1), PathId::new(2), "T"));
        assert_eq!(session.last_accepted(), None);
        session.mark_accepted(fixed_now());
        assert_eq!(session.last_accepted(), Some(fixed_now()));
    }

    #[test]
    fn zero_interval_is_invalid() {
        assert_eq!(
            Heartbeat::new(Duration::zero()).unwrap_err(),
            TimerError::NonPositiveInterval
        );
    }
}
