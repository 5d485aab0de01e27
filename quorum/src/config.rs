//! Runtime configuration
//!
//! Defaults come from the environment (see [`QuorumConfig::from_env`]) and can
//! be layered with a TOML file. Every section is `#[serde(default)]`, so a
//! file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{VerifyError, VerifyResult};

/// Fixed-window quota applied to every oracle call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls admitted per window.
    pub requests_per_window: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 20,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Retry policy for a single oracle call.
///
/// Delay before retry `k` (1-indexed) is
/// `min(base_delay_ms * growth_factor^(k-1), max_delay_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts for transient failures, including the first call.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Growth per attempt. Values below 2.0 are fine.
    pub growth_factor: f64,
    pub max_delay_ms: u64,
    /// Wait used when the oracle rate-limits without a retry-after hint.
    pub rate_limit_fallback_ms: u64,
    /// Rate-limit waits tolerated per call before giving up.
    pub max_rate_limit_waits: u32,
}

impl Default for RetryPolicy {
    /// Default: 3 attempts, 500ms base, 1.5x growth, 5s cap, 30s rate-limit fallback.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            growth_factor: 1.5,
            max_delay_ms: 5_000,
            rate_limit_fallback_ms: 30_000,
            max_rate_limit_waits: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay in milliseconds before retrying after failed attempt `attempt` (1-indexed).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let delay = self.base_delay_ms as f64 * self.growth_factor.powi(attempt as i32 - 1);
        (delay as u64).min(self.max_delay_ms)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }

    pub fn rate_limit_fallback(&self) -> Duration {
        Duration::from_millis(self.rate_limit_fallback_ms)
    }
}

/// Fan-out shape of a verification session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Validator calls run concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches, regardless of call latency.
    pub batch_delay_ms: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            batch_delay_ms: 1_000,
        }
    }
}

impl PanelConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Session bookkeeping for progress tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Snapshots older than this are reported as expired.
    pub stale_after_secs: u64,
    /// Idle sessions are dropped after this long.
    pub evict_after_secs: u64,
    /// Delay between a terminal update and removal of the session.
    pub completion_grace_secs: u64,
    /// Heartbeat interval on live subscriptions.
    pub keepalive_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            evict_after_secs: 900,
            completion_grace_secs: 5,
            keepalive_secs: 30,
        }
    }
}

impl ProgressConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn evict_after(&self) -> Duration {
        Duration::from_secs(self.evict_after_secs)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_secs(self.completion_grace_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Gemini endpoint settings. API keys are never written back out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub verify_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub answer_api_key: Option<String>,
    pub verify_temperature: f32,
    pub answer_temperature: f32,
    pub verify_max_tokens: u32,
    pub answer_max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash-lite".to_string(),
            verify_api_key: None,
            answer_api_key: None,
            verify_temperature: 0.1,
            answer_temperature: 0.7,
            verify_max_tokens: 200,
            answer_max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

impl GeminiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level configuration for a [`crate::service::VerificationService`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub panel: PanelConfig,
    pub progress: ProgressConfig,
    pub gemini: GeminiSettings,
}

impl QuorumConfig {
    /// Defaults overridden by environment variables.
    ///
    /// Recognised: `GEMINI_VERIFY_API_KEY`, `GEMINI_ANSWER_API_KEY`,
    /// `GEMINI_MODEL`, `GEMINI_BASE_URL`, `QUORUM_REQUESTS_PER_MINUTE`,
    /// `QUORUM_MAX_ATTEMPTS`, `QUORUM_BATCH_SIZE`, `QUORUM_BATCH_DELAY_MS`.
    /// Unparseable numbers are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML file, then apply environment overrides on top.
    pub fn from_toml_file(path: &Path) -> VerifyResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VerifyError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> VerifyResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| VerifyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_VERIFY_API_KEY") {
            self.gemini.verify_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_ANSWER_API_KEY") {
            self.gemini.answer_api_key = Some(key);
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            self.gemini.model = model;
        }
        if let Ok(url) = std::env::var("GEMINI_BASE_URL") {
            self.gemini.base_url = url;
        }
        if let Some(n) = env_parse("QUORUM_REQUESTS_PER_MINUTE") {
            self.rate_limit.requests_per_window = n;
            self.rate_limit.window_secs = 60;
        }
        if let Some(n) = env_parse("QUORUM_MAX_ATTEMPTS") {
            self.retry.max_attempts = n;
        }
        if let Some(n) = env_parse("QUORUM_BATCH_SIZE") {
            self.panel.batch_size = n;
        }
        if let Some(n) = env_parse("QUORUM_BATCH_DELAY_MS") {
            self.panel.batch_delay_ms = n;
        }
    }

    /// Reject settings that would stall or divide by zero.
    pub fn validate(&self) -> VerifyResult<()> {
        if self.rate_limit.requests_per_window == 0 {
            return Err(VerifyError::Config(
                "rate_limit.requests_per_window must be > 0".into(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(VerifyError::Config("rate_limit.window_secs must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(VerifyError::Config("retry.max_attempts must be > 0".into()));
        }
        if self.retry.growth_factor.is_nan() || self.retry.growth_factor < 1.0 {
            return Err(VerifyError::Config("retry.growth_factor must be >= 1.0".into()));
        }
        if self.panel.batch_size == 0 {
            return Err(VerifyError::Config("panel.batch_size must be > 0".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
