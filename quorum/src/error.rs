//! Error taxonomy for oracle calls and verification sessions
//!
//! Oracle failures are classified so the backoff executor can decide whether
//! to wait out a quota, retry with growing delay, or give up immediately.
//! Verification errors are the only failures that reach the caller of
//! [`crate::service::VerificationService::verify`]; everything below validator
//! granularity is recorded as a failed vote instead.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification used by the backoff executor to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Quota exhausted upstream; wait for the hint (or fallback) and retry.
    RateLimit,
    /// Network or server-side failure; retry with growing delay.
    Transient,
    /// Request can never succeed as issued. Never retried.
    Fatal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Transient)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Failures reported by an [`crate::oracle::OracleClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    /// The oracle explicitly signalled quota exhaustion.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Network error, timeout, or 5xx.
    #[error("Transient oracle failure: {0}")]
    Transient(String),

    /// Malformed request, bad credentials, or anything else retrying won't fix.
    #[error("Fatal oracle failure: {0}")]
    Fatal(String),
}

impl OracleError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::RateLimited { .. } => RetryCategory::RateLimit,
            Self::Transient(_) => RetryCategory::Transient,
            Self::Fatal(_) => RetryCategory::Fatal,
        }
    }
}

/// Errors surfaced by verification sessions.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Oracle call failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: OracleError,
    },

    /// Non-retriable oracle failure, surfaced on the first attempt.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("No propositions found in oracle output")]
    NoPropositions,

    #[error("{0} oracle is not configured")]
    NotConfigured(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session setup failed: {0}")]
    Setup(String),
}

impl VerifyError {
    /// The underlying oracle failure, if this error came from an oracle call.
    pub fn oracle_error(&self) -> Option<&OracleError> {
        match self {
            Self::ExhaustedRetries { source, .. } => Some(source),
            Self::Oracle(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerifyError>;
