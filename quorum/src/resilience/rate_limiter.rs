//! Fixed-window rate limiter guarding the oracle quota
//!
//! Window rollover is detected lazily on each call rather than by a
//! background timer, so dropping the limiter leaves nothing running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Shared reference to a RateLimiter
pub type SharedRateLimiter = Arc<RateLimiter>;

/// Read-only view of the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub resets_in_ms: u64,
}

#[derive(Debug)]
struct WindowState {
    count: u32,
    reset_at: Instant,
}

impl WindowState {
    /// Start a fresh window if the current one has lapsed.
    fn roll(&mut self, now: Instant, window: Duration) {
        if now >= self.reset_at {
            self.count = 0;
            self.reset_at = now + window;
        }
    }
}

/// Admits at most `limit` calls per `window`.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// `limit` is clamped to at least one call per window.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            state: Mutex::new(WindowState {
                count: 0,
                reset_at: Instant::now() + window,
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_window, config.window())
    }

    pub fn shared(self) -> SharedRateLimiter {
        Arc::new(self)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Suspend until a slot is free in the current window, then take it.
    ///
    /// Never fails: a full window always lapses eventually.
    pub async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                state.roll(now, self.window);
                if state.count < self.limit {
                    state.count += 1;
                    debug!(count = state.count, limit = self.limit, "Rate limiter slot granted");
                    return;
                }
                state.reset_at.saturating_duration_since(now)
            };

            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting for window reset");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.roll(Instant::now(), self.window);
        if state.count < self.limit {
            state.count += 1;
            true
        } else {
            false
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        state.roll(now, self.window);
        let resets_in = state.reset_at.saturating_duration_since(now);
        let reset_at = Utc::now()
            + chrono::Duration::from_std(resets_in).unwrap_or_else(|_| chrono::Duration::zero());

        RateLimitStatus {
            count: state.count,
            limit: self.limit,
            remaining: self.limit.saturating_sub(state.count),
            reset_at,
            resets_in_ms: resets_in.as_millis() as u64,
        }
    }
}
