use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One throttling window for a client identifier and limit type.
///
/// Window expiry and block expiry are independent timers: a record can stay
/// blocked long after its counting window has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Row identifier.
    pub id: Uuid,
    /// Client identifier, usually a normalized source address.
    pub ip: String,
    /// Limiter namespace this row belongs to.
    pub limit_type: String,
    /// Tracked attempts inside the window, starting at one.
    pub attempts: i32,
    /// Inclusive start of the counting window.
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the counting window.
    pub window_end: DateTime<Utc>,
    /// Whether the ceiling has been exceeded.
    pub blocked: bool,
    /// Rejection boundary, present whenever `blocked` is set.
    pub blocked_until: Option<DateTime<Utc>>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl RateLimitRecord {
    /// Builds a fresh window holding its first attempt.
    #[must_use]
    pub fn open_window(
        ip: impl Into<String>,
        limit_type: impl Into<String>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip: ip.into(),
            limit_type: limit_type.into(),
            attempts: 1,
            window_start,
            window_end,
            blocked: false,
            blocked_until: None,
            created_at: window_start,
            updated_at: window_start,
        }
    }

    /// Returns whether attempts still accumulate on this row at `now`.
    #[must_use]
    pub fn is_window_active(&self, now: DateTime<Utc>) -> bool {
        self.window_end > now
    }

    /// Returns whether the client is rejected by this row at `now`.
    #[must_use]
    pub fn is_block_active(&self, now: DateTime<Utc>) -> bool {
        self.blocked
            && self
                .blocked_until
                .is_some_and(|blocked_until| blocked_until > now)
    }

    /// Expired and never blocked. Safe to drop before opening a new window.
    #[must_use]
    pub fn is_stale_window(&self, now: DateTime<Utc>) -> bool {
        !self.is_window_active(now) && !self.blocked
    }

    /// Neither the window nor the block carries meaning anymore.
    #[must_use]
    pub fn is_inert(&self, now: DateTime<Utc>) -> bool {
        !self.is_window_active(now) && !self.is_block_active(now)
    }
}
