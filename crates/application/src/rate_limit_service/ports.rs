use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tempo_core::AppResult;
use tempo_domain::RateLimitRecord;

/// Repository port for throttle window persistence.
///
/// Implementations must reject a second window with the same
/// `(ip, limit_type, window_end)` with `AppError::Conflict` so that creation
/// races surface to the service.
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Returns a row that is blocked with `blocked_until > now`.
    async fn find_active_block(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RateLimitRecord>>;

    /// Returns the row with `window_end > now` and the latest `window_end`.
    async fn find_active_window(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RateLimitRecord>>;

    /// Returns the row with the latest `window_end` regardless of expiry.
    async fn find_latest_window(
        &self,
        ip: &str,
        limit_type: &str,
    ) -> AppResult<Option<RateLimitRecord>>;

    /// Inserts a new window row.
    async fn create_window(&self, record: &RateLimitRecord) -> AppResult<RateLimitRecord>;

    /// Adds one attempt to a row and returns the updated row.
    async fn increment_attempts(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<RateLimitRecord>;

    /// Flags a row as blocked until the given instant.
    async fn mark_blocked(
        &self,
        id: Uuid,
        blocked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Deletes expired, non-blocked rows for one client and limit type.
    async fn delete_stale_windows(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Deletes every row for one client and limit type.
    async fn delete_client_windows(&self, ip: &str, limit_type: &str) -> AppResult<u64>;

    /// Deletes rows whose window and block have both ended.
    async fn delete_inert(&self, now: DateTime<Utc>) -> AppResult<u64>;
}

/// Time source for window arithmetic.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
