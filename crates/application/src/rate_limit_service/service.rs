use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use tempo_core::AppResult;
use tempo_domain::{BlockStatus, RateLimitRecord, ThrottlePolicy, ThrottleStatus};

use super::ports::{Clock, RateLimitRepository, SystemClock};

/// Offset applied to the last-resort window so it cannot collide with the
/// window a concurrent request just created.
const COLLISION_OFFSET_MS: i64 = 1_000;

/// Result of tracking one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptInfo {
    /// Attempts in the active window including this one; zero when the
    /// attempt could not be persisted.
    pub attempt_count: i32,
    /// Whether this attempt escalated the client to a block.
    pub blocked_now: bool,
}

impl AttemptInfo {
    fn untracked() -> Self {
        Self {
            attempt_count: 0,
            blocked_now: false,
        }
    }
}

/// Throttle evaluator.
///
/// Every operation round-trips to the repository; nothing is cached in
/// process so several API instances can share one table.
#[derive(Clone)]
pub struct ThrottleService {
    repository: Arc<dyn RateLimitRepository>,
    clock: Arc<dyn Clock>,
}

impl ThrottleService {
    /// Creates a service using the wall clock.
    #[must_use]
    pub fn new(repository: Arc<dyn RateLimitRepository>) -> Self {
        Self::with_clock(repository, Arc::new(SystemClock))
    }

    /// Creates a service with an explicit time source.
    #[must_use]
    pub fn with_clock(repository: Arc<dyn RateLimitRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Returns whether the client is currently blocked under `limit_type`.
    ///
    /// Read-only. Reports not blocked when the store is unavailable.
    pub async fn check_blocked(&self, client_id: &str, limit_type: &str) -> BlockStatus {
        let now = self.clock.now();
        match self
            .repository
            .find_active_block(client_id, limit_type, now)
            .await
        {
            Ok(Some(record)) => record
                .blocked_until
                .map(|blocked_until| BlockStatus::until(blocked_until, now))
                .unwrap_or_else(BlockStatus::clear),
            Ok(None) => BlockStatus::clear(),
            Err(error) => {
                warn!(
                    client_id,
                    limit_type,
                    error = %error,
                    "rate limit block lookup failed, allowing request"
                );
                BlockStatus::clear()
            }
        }
    }

    /// Records one attempt and returns whether it tripped a block.
    pub async fn record_attempt(&self, client_id: &str, policy: &ThrottlePolicy) -> bool {
        self.track_attempt(client_id, policy).await.blocked_now
    }

    /// Records one attempt and returns the resulting window state.
    ///
    /// Never fails: a store outage is logged and reported as an untracked,
    /// non-blocking attempt.
    pub async fn track_attempt(&self, client_id: &str, policy: &ThrottlePolicy) -> AttemptInfo {
        match self.try_track_attempt(client_id, policy).await {
            Ok(info) => info,
            Err(error) => {
                warn!(
                    client_id,
                    limit_type = policy.limit_type(),
                    error = %error,
                    "failed to record rate limit attempt"
                );
                AttemptInfo::untracked()
            }
        }
    }

    /// Returns whether the client is blocked or has used its whole allowance.
    pub async fn is_limited(&self, client_id: &str, policy: &ThrottlePolicy) -> bool {
        if self
            .check_blocked(client_id, policy.limit_type())
            .await
            .blocked
        {
            return true;
        }

        let now = self.clock.now();
        match self
            .repository
            .find_active_window(client_id, policy.limit_type(), now)
            .await
        {
            Ok(window) => window.is_some_and(|record| policy.is_at_ceiling(record.attempts)),
            Err(error) => {
                warn!(
                    client_id,
                    limit_type = policy.limit_type(),
                    error = %error,
                    "rate limit window lookup failed, allowing request"
                );
                false
            }
        }
    }

    /// Returns the client's standing under a policy.
    pub async fn status(
        &self,
        client_id: &str,
        policy: &ThrottlePolicy,
    ) -> AppResult<ThrottleStatus> {
        let now = self.clock.now();
        let limit_type = policy.limit_type();

        let block = self
            .repository
            .find_active_block(client_id, limit_type, now)
            .await?
            .and_then(|record| record.blocked_until)
            .map(|blocked_until| BlockStatus::until(blocked_until, now))
            .unwrap_or_else(BlockStatus::clear);
        let attempts = self
            .repository
            .find_active_window(client_id, limit_type, now)
            .await?
            .map(|record| record.attempts)
            .unwrap_or(0);

        Ok(ThrottleStatus {
            client_id: client_id.to_owned(),
            limit_type: limit_type.to_owned(),
            attempts,
            limit: policy.max_attempts(),
            remaining: policy.remaining(attempts),
            block,
        })
    }

    /// Removes every window and block for a client. Returns deleted rows.
    pub async fn reset(&self, client_id: &str, limit_type: &str) -> AppResult<u64> {
        let deleted = self
            .repository
            .delete_client_windows(client_id, limit_type)
            .await?;
        debug!(client_id, limit_type, deleted, "rate limit state reset");
        Ok(deleted)
    }

    /// Deletes inert rows across all clients. Intended for periodic cleanup.
    pub async fn sweep(&self) -> AppResult<u64> {
        self.repository.delete_inert(self.clock.now()).await
    }

    async fn try_track_attempt(
        &self,
        client_id: &str,
        policy: &ThrottlePolicy,
    ) -> AppResult<AttemptInfo> {
        let now = self.clock.now();
        let record = self.acquire_window(client_id, policy, now).await?;

        if !policy.exceeds_ceiling(record.attempts) {
            return Ok(AttemptInfo {
                attempt_count: record.attempts,
                blocked_now: false,
            });
        }

        let blocked_until = policy.blocked_until(now);
        self.repository
            .mark_blocked(record.id, blocked_until, now)
            .await?;
        warn!(
            client_id,
            limit_type = policy.limit_type(),
            attempts = record.attempts,
            %blocked_until,
            "client blocked after exceeding attempt ceiling"
        );

        Ok(AttemptInfo {
            attempt_count: record.attempts,
            blocked_now: true,
        })
    }

    /// Increments the active window or opens a new one.
    ///
    /// Concurrent first attempts can race on window creation. A conflicting
    /// insert falls back to the window the other request created, then to the
    /// latest window of any age, then to a window offset past the collision.
    async fn acquire_window(
        &self,
        client_id: &str,
        policy: &ThrottlePolicy,
        now: DateTime<Utc>,
    ) -> AppResult<RateLimitRecord> {
        let limit_type = policy.limit_type();

        if let Some(active) = self
            .repository
            .find_active_window(client_id, limit_type, now)
            .await?
        {
            return self.repository.increment_attempts(active.id, now).await;
        }

        if let Err(error) = self
            .repository
            .delete_stale_windows(client_id, limit_type, now)
            .await
        {
            debug!(client_id, limit_type, error = %error, "stale window cleanup skipped");
        }

        let fresh = RateLimitRecord::open_window(client_id, limit_type, now, policy.window_end(now));
        let create_error = match self.repository.create_window(&fresh).await {
            Ok(record) => return Ok(record),
            Err(error) => error,
        };
        debug!(
            client_id,
            limit_type,
            error = %create_error,
            "rate limit window creation collided, retrying"
        );

        if let Some(active) = self
            .repository
            .find_active_window(client_id, limit_type, now)
            .await?
        {
            return self.repository.increment_attempts(active.id, now).await;
        }

        if let Some(latest) = self
            .repository
            .find_latest_window(client_id, limit_type)
            .await?
        {
            return self.repository.increment_attempts(latest.id, now).await;
        }

        let offset = RateLimitRecord::open_window(
            client_id,
            limit_type,
            now,
            fresh.window_end + Duration::milliseconds(COLLISION_OFFSET_MS),
        );
        self.repository.create_window(&offset).await
    }
}
