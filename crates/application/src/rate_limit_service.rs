//! Request throttling ports and application service.
//!
//! Implements a sliding-window throttle backed by the `rate_limits` table.
//! Attempts accumulate per client identifier and limit type; exceeding the
//! ceiling escalates to a temporary block that outlives the window. Store
//! failures never deny traffic: every entry point fails open.

mod limiter;
mod ports;
mod service;


pub use limiter::{Guarded, Limiter};
pub use ports::{Clock, RateLimitRepository, SystemClock};
pub use service::{AttemptInfo, ThrottleService};
