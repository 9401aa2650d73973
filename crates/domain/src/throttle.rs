use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempo_core::{AppError, AppResult, NonEmptyString};

/// Longest accepted window or block duration.
pub const MAX_POLICY_DAYS: i64 = 366;

/// Limits applied to one limiter namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlePolicy {
    limit_type: NonEmptyString,
    max_attempts: i32,
    window: Duration,
    block_duration: Duration,
}

impl ThrottlePolicy {
    /// Creates a validated policy.
    ///
    /// `max_attempts` attempts are allowed per window; the next one trips a
    /// block lasting `block_duration`.
    pub fn new(
        limit_type: impl Into<String>,
        max_attempts: i32,
        window: Duration,
        block_duration: Duration,
    ) -> AppResult<Self> {
        let limit_type = NonEmptyString::new(limit_type)
            .map_err(|_| AppError::Validation("limit type must not be empty".to_owned()))?;

        if max_attempts < 0 {
            return Err(AppError::Validation(format!(
                "max attempts for '{limit_type}' must not be negative"
            )));
        }

        if window <= Duration::zero() {
            return Err(AppError::Validation(format!(
                "window for '{limit_type}' must be greater than zero"
            )));
        }

        if block_duration <= Duration::zero() {
            return Err(AppError::Validation(format!(
                "block duration for '{limit_type}' must be greater than zero"
            )));
        }

        let longest = Duration::days(MAX_POLICY_DAYS);
        if window > longest || block_duration > longest {
            return Err(AppError::Validation(format!(
                "window and block duration for '{limit_type}' must not exceed {MAX_POLICY_DAYS} days"
            )));
        }

        Ok(Self {
            limit_type,
            max_attempts,
            window,
            block_duration,
        })
    }

    /// Creates a policy from second-based durations.
    pub fn from_seconds(
        limit_type: impl Into<String>,
        max_attempts: i32,
        window_seconds: i64,
        block_seconds: i64,
    ) -> AppResult<Self> {
        let seconds = |value: i64, name: &str| {
            Duration::try_seconds(value).ok_or_else(|| {
                AppError::Validation(format!("{name} of {value} seconds is out of range"))
            })
        };

        Self::new(
            limit_type,
            max_attempts,
            seconds(window_seconds, "window")?,
            seconds(block_seconds, "block duration")?,
        )
    }

    /// Returns the limiter namespace.
    #[must_use]
    pub fn limit_type(&self) -> &str {
        self.limit_type.as_str()
    }

    /// Returns the number of attempts tolerated per window.
    #[must_use]
    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Returns the counting window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns the punitive block length.
    #[must_use]
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    /// Strictly greater: the ceiling itself is still allowed.
    #[must_use]
    pub fn exceeds_ceiling(&self, attempts: i32) -> bool {
        attempts > self.max_attempts
    }

    /// Returns whether one more tracked attempt would trip the block.
    #[must_use]
    pub fn is_at_ceiling(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }

    /// Remaining allowance, floored at zero.
    #[must_use]
    pub fn remaining(&self, attempts: i32) -> i32 {
        self.max_attempts.saturating_sub(attempts).max(0)
    }

    /// End of a window opened at `now`.
    #[must_use]
    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// End of a block started at `now`.
    #[must_use]
    pub fn blocked_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.block_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Which request outcomes count as a tracked attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CountingMode {
    /// Count depending on whether the guarded operation succeeded.
    OnOutcome {
        /// Count successful outcomes.
        on_success: bool,
        /// Count failed outcomes, including errors.
        on_failure: bool,
    },
    /// Count every request that passes the block check.
    EveryPass,
    /// Never count automatically.
    Manual,
}

impl CountingMode {
    /// Counts failures only.
    #[must_use]
    pub fn failures_only() -> Self {
        Self::OnOutcome {
            on_success: false,
            on_failure: true,
        }
    }

    /// Returns whether an outcome should be recorded.
    #[must_use]
    pub fn counts(&self, succeeded: bool) -> bool {
        match self {
            Self::OnOutcome {
                on_success,
                on_failure,
            } => {
                if succeeded {
                    *on_success
                } else {
                    *on_failure
                }
            }
            Self::EveryPass => true,
            Self::Manual => false,
        }
    }
}

impl Default for CountingMode {
    fn default() -> Self {
        Self::failures_only()
    }
}

/// Admission decision for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatus {
    /// Whether the client is currently rejected.
    pub blocked: bool,
    /// Milliseconds until the block lifts, zero when not blocked.
    pub retry_after_ms: i64,
}

impl BlockStatus {
    /// Not blocked.
    #[must_use]
    pub fn clear() -> Self {
        Self {
            blocked: false,
            retry_after_ms: 0,
        }
    }

    /// Blocked until `blocked_until`. A boundary already in the past reports
    /// zero rather than a negative delay.
    #[must_use]
    pub fn until(blocked_until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            blocked: true,
            retry_after_ms: (blocked_until - now).num_milliseconds().max(0),
        }
    }

    /// Whole seconds to wait, rounded up.
    #[must_use]
    pub fn retry_after_seconds(&self) -> i64 {
        (self.retry_after_ms + 999) / 1000
    }
}

/// Snapshot of a client's standing under one limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleStatus {
    /// Client identifier.
    pub client_id: String,
    /// Limiter namespace.
    pub limit_type: String,
    /// Attempts tracked in the active window.
    pub attempts: i32,
    /// Configured ceiling.
    pub limit: i32,
    /// Attempts left before a block.
    pub remaining: i32,
    /// Current admission decision.
    pub block: BlockStatus,
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use super::{BlockStatus, CountingMode, MAX_POLICY_DAYS, ThrottlePolicy};

    fn policy(max_attempts: i32) -> ThrottlePolicy {
        ThrottlePolicy::from_seconds("login", max_attempts, 10, 60)
            .unwrap_or_else(|error| panic!("invalid test policy: {error}"))
    }

    #[test]
    fn empty_limit_type_is_rejected() {
        assert!(ThrottlePolicy::from_seconds("  ", 3, 10, 60).is_err());
    }

    #[test]
    fn non_positive_durations_are_rejected() {
        assert!(ThrottlePolicy::from_seconds("login", 3, 0, 60).is_err());
        assert!(ThrottlePolicy::from_seconds("login", 3, 10, -1).is_err());
    }

    #[test]
    fn oversized_durations_are_rejected_without_panicking() {
        assert!(ThrottlePolicy::from_seconds("login", 3, 9_000_000_000_000, 60).is_err());
        assert!(ThrottlePolicy::from_seconds("login", 3, i64::MAX, 60).is_err());
        assert!(ThrottlePolicy::from_seconds("login", 3, 60, i64::MAX).is_err());

        let one_day_over = (MAX_POLICY_DAYS + 1) * 24 * 60 * 60;
        assert!(ThrottlePolicy::from_seconds("login", 3, one_day_over, 60).is_err());
        assert!(ThrottlePolicy::from_seconds("login", 3, 60, one_day_over - 86_400).is_ok());
    }

    #[test]
    fn deadlines_saturate_at_the_end_of_time() {
        let policy = policy(3);
        let late = DateTime::<Utc>::MAX_UTC - Duration::seconds(1);
        assert_eq!(policy.window_end(late), DateTime::<Utc>::MAX_UTC);
        assert_eq!(policy.blocked_until(late), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn negative_ceiling_is_rejected() {
        assert!(ThrottlePolicy::from_seconds("login", -1, 10, 60).is_err());
    }

    #[test]
    fn ceiling_itself_is_allowed() {
        let policy = policy(3);
        assert!(!policy.exceeds_ceiling(3));
        assert!(policy.exceeds_ceiling(4));
        assert!(policy.is_at_ceiling(3));
    }

    #[test]
    fn default_counting_mode_counts_failures_only() {
        let mode = CountingMode::default();
        assert!(mode.counts(false));
        assert!(!mode.counts(true));
    }

    #[test]
    fn every_pass_and_manual_ignore_outcome() {
        assert!(CountingMode::EveryPass.counts(true));
        assert!(CountingMode::EveryPass.counts(false));
        assert!(!CountingMode::Manual.counts(true));
        assert!(!CountingMode::Manual.counts(false));
    }

    #[test]
    fn outcome_mode_with_both_flags_counts_everything() {
        let mode = CountingMode::OnOutcome {
            on_success: true,
            on_failure: true,
        };
        assert!(mode.counts(true));
        assert!(mode.counts(false));
    }

    #[test]
    fn just_expired_block_reports_zero_retry() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .unwrap_or_default();
        let status = BlockStatus::until(now - Duration::milliseconds(5), now);
        assert!(status.blocked);
        assert_eq!(status.retry_after_ms, 0);
    }

    #[test]
    fn retry_seconds_round_up() {
        let status = BlockStatus {
            blocked: true,
            retry_after_ms: 1_001,
        };
        assert_eq!(status.retry_after_seconds(), 2);
        assert_eq!(BlockStatus::clear().retry_after_seconds(), 0);
    }

    proptest! {
        #[test]
        fn only_the_attempt_after_the_ceiling_trips(max_attempts in 0_i32..500, attempts in 1_i32..1_000) {
            let policy = policy(max_attempts);
            let tripped_before = attempts > 1 && policy.exceeds_ceiling(attempts - 1);
            let tripped_now = policy.exceeds_ceiling(attempts);
            prop_assert_eq!(tripped_now && !tripped_before, attempts == max_attempts + 1);
        }

        #[test]
        fn remaining_never_negative(max_attempts in 0_i32..500, attempts in 0_i32..1_000) {
            let policy = policy(max_attempts);
            let remaining = policy.remaining(attempts);
            prop_assert!(remaining >= 0);
            prop_assert!(remaining <= max_attempts);
        }

        #[test]
        fn retry_after_is_never_negative(offset_ms in -100_000_i64..100_000) {
            let now = Utc::now();
            let status = BlockStatus::until(now + Duration::milliseconds(offset_ms), now);
            prop_assert!(status.retry_after_ms >= 0);
        }
    }
}
