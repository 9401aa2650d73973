//! Application services and ports.

#![forbid(unsafe_code)]

mod rate_limit_service;

pub use rate_limit_service::{
    AttemptInfo, Clock, Guarded, Limiter, RateLimitRepository, SystemClock, ThrottleService,
};
