//! Quorum: verify propositions against a panel of rate-limited oracle calls
//!
//! This crate provides:
//! - **resilience**: fixed-window rate limiter and retrying backoff executor
//! - **oracle**: the oracle client trait, verdict parsing, and a Gemini adapter
//! - **panel**: the validator catalog and the bounded-parallel orchestrator
//! - **progress**: per-session progress snapshots and live subscriptions
//! - **consensus**: majority analysis, rollups, and answer quality scoring
//! - **service**: the process-wide entry point tying it all together

pub mod config;
pub mod consensus;
pub mod error;
pub mod oracle;
pub mod panel;
pub mod progress;
pub mod resilience;
pub mod service;

pub use config::QuorumConfig;
pub use consensus::{
    AnswerQuality, ConsensusAggregator, ConsensusAnalysis, ConsensusSummary, TiePolicy,
};
pub use error::{OracleError, VerifyError, VerifyResult};
pub use oracle::{OracleClient, OracleReply, SharedOracle, Verdict};
pub use panel::{
    PropositionPanel, ValidatorCategory, ValidatorOrchestrator, ValidatorPanel, ValidatorResult,
};
pub use progress::{
    ProgressEvent, ProgressSnapshot, ProgressSubscription, ProgressTracker, SessionStatus, Step,
    StreamFrame,
};
pub use resilience::{BackoffExecutor, RateLimitStatus, RateLimiter};
pub use service::{
    HealthStatus, SharedVerificationService, VerificationReport, VerificationRequest,
    VerificationService,
};
