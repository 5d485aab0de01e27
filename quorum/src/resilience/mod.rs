//! Quota enforcement and retry handling for oracle calls

pub mod backoff;
pub mod rate_limiter;

pub use backoff::BackoffExecutor;
pub use rate_limiter::{RateLimitStatus, RateLimiter, SharedRateLimiter};
