//! Retrying executor for oracle calls
//!
//! Every attempt first takes a slot from the shared [`RateLimiter`]. Failures
//! are handled by [`RetryCategory`]:
//!
//! - rate limit: wait the oracle's hint (or the fallback) and retry without
//!   advancing the exponential delay; bounded by `max_rate_limit_waits`
//! - transient: wait `min(base * growth^(k-1), max)` and retry until
//!   `max_attempts` calls have failed
//! - fatal: surfaced immediately
//!
//! [`RateLimiter`]: super::rate_limiter::RateLimiter

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use super::rate_limiter::SharedRateLimiter;
use crate::config::RetryPolicy;
use crate::error::{OracleError, RetryCategory, VerifyError, VerifyResult};

pub struct BackoffExecutor {
    policy: RetryPolicy,
    limiter: SharedRateLimiter,
    /// Consecutive transient failures since the last success or reset.
    attempt: AtomicU32,
}

impl BackoffExecutor {
    pub fn new(policy: RetryPolicy, limiter: SharedRateLimiter) -> Self {
        Self {
            policy,
            limiter,
            attempt: AtomicU32::new(0),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current failure count. Zero after a success or [`reset`](Self::reset).
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Zero the failure count, e.g. between unrelated operations on one executor.
    pub fn reset(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    /// Run `operation` until it succeeds, fails fatally, or retries run out.
    ///
    /// On exhaustion the last oracle failure is returned inside
    /// [`VerifyError::ExhaustedRetries`]. The failure count is left as-is so
    /// callers can inspect it; call [`reset`](Self::reset) before reusing.
    pub async fn execute_with_retry<T, F, Fut>(&self, mut operation: F) -> VerifyResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut calls: u32 = 0;
        let mut rate_limit_waits: u32 = 0;

        loop {
            self.limiter.wait_for_slot().await;
            calls += 1;

            let err = match operation().await {
                Ok(value) => {
                    self.reset();
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.retry_category() {
                RetryCategory::RateLimit => {
                    rate_limit_waits += 1;
                    if rate_limit_waits > self.policy.max_rate_limit_waits {
                        warn!(calls, "Oracle still rate limited, giving up");
                        return Err(VerifyError::ExhaustedRetries {
                            attempts: calls,
                            source: err,
                        });
                    }
                    let wait = match &err {
                        OracleError::RateLimited {
                            retry_after: Some(hint),
                        } => *hint,
                        _ => self.policy.rate_limit_fallback(),
                    };
                    warn!(
                        wait_ms = wait.as_millis() as u64,
                        rate_limit_waits,
                        "Oracle rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                RetryCategory::Transient => {
                    let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt >= self.policy.max_attempts {
                        warn!(attempt, error = %err, "Retries exhausted");
                        return Err(VerifyError::ExhaustedRetries {
                            attempts: calls,
                            source: err,
                        });
                    }
                    let delay = self.policy.delay(attempt);
                    debug!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient oracle failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryCategory::Fatal => {
                    warn!(error = %err, "Fatal oracle failure, not retrying");
                    return Err(VerifyError::Oracle(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::rate_limiter::RateLimiter;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 1000,
            growth_factor: 1.5,
            max_delay_ms: 2000,
            rate_limit_fallback_ms: 30_000,
            max_rate_limit_waits: 2,
        }
    }

    fn executor(policy: RetryPolicy) -> BackoffExecutor {
        BackoffExecutor::new(policy, RateLimiter::new(1000, Duration::from_secs(60)).shared())
    }

    /// Operation that fails with `failures[i]` on call i, then succeeds.
    fn scripted(
        failures: Vec<OracleError>,
        calls: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str, OracleError>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(match failures.get(n) {
                Some(e) => Err(e.clone()),
                None => Ok("ok"),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let exec = executor(policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let out = exec.execute_with_retry(scripted(vec![], calls.clone())).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_delays_follow_formula() {
        let exec = executor(policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let transient = OracleError::Transient("503".into());
        let start = Instant::now();

        exec.execute_with_retry(scripted(vec![transient.clone(); 3], calls.clone()))
            .await
            .unwrap();

        // 1000 + 1500 + min(2250, 2000)
        assert_eq!(start.elapsed(), Duration::from_millis(4500));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(exec.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_restarts_after_success() {
        let exec = executor(policy());
        let transient = OracleError::Transient("reset".into());

        let calls = Arc::new(AtomicUsize::new(0));
        exec.execute_with_retry(scripted(vec![transient.clone(); 2], calls))
            .await
            .unwrap();

        let start = Instant::now();
        let calls = Arc::new(AtomicUsize::new(0));
        exec.execute_with_retry(scripted(vec![transient], calls))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error() {
        let exec = executor(policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let transient = OracleError::Transient("upstream down".into());

        let err = exec
            .execute_with_retry(scripted(vec![transient.clone(); 10], calls.clone()))
            .await
            .unwrap_err();

        match err {
            VerifyError::ExhaustedRetries { attempts, source } => {
                assert_eq!(attempts, 4);
                assert_eq!(source, transient);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(exec.attempt(), 4);

        exec.reset();
        assert_eq!(exec.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_uses_hint_then_fallback() {
        let exec = executor(policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        exec.execute_with_retry(scripted(
            vec![
                OracleError::RateLimited {
                    retry_after: Some(Duration::from_secs(7)),
                },
                OracleError::RateLimited { retry_after: None },
            ],
            calls.clone(),
        ))
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(37));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_does_not_advance_exponent() {
        let exec = executor(policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        exec.execute_with_retry(scripted(
            vec![
                OracleError::RateLimited {
                    retry_after: Some(Duration::from_secs(1)),
                },
                OracleError::Transient("blip".into()),
            ],
            calls,
        ))
        .await
        .unwrap();

        // 1s hint + first-attempt backoff of 1000ms
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_rate_limit_gives_up() {
        let exec = executor(policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let limited = OracleError::RateLimited {
            retry_after: Some(Duration::from_secs(1)),
        };

        let err = exec
            .execute_with_retry(scripted(vec![limited; 10], calls.clone()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VerifyError::ExhaustedRetries {
                source: OracleError::RateLimited { .. },
                ..
            }
        ));
        // two waits tolerated, third rate limit ends it
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_not_retried() {
        let exec = executor(policy());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = exec
            .execute_with_retry(scripted(
                vec![OracleError::Fatal("401 unauthorized".into())],
                calls.clone(),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::Oracle(OracleError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_takes_a_slot() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60)).shared();
        let exec = BackoffExecutor::new(policy(), limiter.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        exec.execute_with_retry(scripted(
            vec![OracleError::Transient("x".into()); 2],
            calls,
        ))
        .await
        .unwrap();

        assert_eq!(limiter.status().count, 3);
    }
}
