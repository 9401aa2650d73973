//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod rate_limit_record;
mod throttle;

pub use rate_limit_record::RateLimitRecord;
pub use throttle::{BlockStatus, CountingMode, MAX_POLICY_DAYS, ThrottlePolicy, ThrottleStatus};
