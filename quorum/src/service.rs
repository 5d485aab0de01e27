//! Verification service
//!
//! The one object a process builds at startup. It owns the shared rate
//! limiter and progress tracker, so every verification, split, and answer
//! call draws from the same oracle quota, and hands out cheap handles for
//! status reads and live subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::config::QuorumConfig;
use crate::consensus::{AnswerQuality, ConsensusAggregator, ConsensusAnalysis, ConsensusSummary};
use crate::error::{VerifyError, VerifyResult};
use crate::oracle::{GeminiOracle, SharedOracle};
use crate::panel::{prompt, ValidatorOrchestrator, ValidatorPanel, ValidatorResult};
use crate::progress::{ProgressSubscription, ProgressTracker, SessionStatus};
use crate::resilience::{BackoffExecutor, RateLimitStatus, RateLimiter, SharedRateLimiter};

/// Shortest question accepted for answer generation, in characters.
pub const MIN_QUESTION_CHARS: usize = 5;

/// Shared reference to a VerificationService
pub type SharedVerificationService = Arc<VerificationService>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Client-chosen session id; one is generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub propositions: Vec<String>,
}

impl VerificationRequest {
    pub fn new(propositions: Vec<String>) -> Self {
        Self {
            session_id: None,
            propositions,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Panel results and consensus for one proposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropositionReport {
    pub proposition: String,
    pub validators: Vec<ValidatorResult>,
    pub analysis: ConsensusAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub session_id: String,
    pub results: Vec<PropositionReport>,
    pub summary: ConsensusSummary,
    pub answer_quality: AnswerQuality,
    pub total_units: usize,
    pub failed_units: usize,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Name of the verify oracle.
    pub verify_oracle: String,
    /// Name of the answer oracle, if one is configured.
    pub answer_oracle: Option<String>,
    pub rate_limit: RateLimitStatus,
    pub active_sessions: usize,
}

impl HealthStatus {
    pub fn can_answer(&self) -> bool {
        self.answer_oracle.is_some()
    }
}

pub struct VerificationService {
    config: QuorumConfig,
    verify_oracle: SharedOracle,
    answer_oracle: Option<SharedOracle>,
    limiter: SharedRateLimiter,
    tracker: ProgressTracker,
    orchestrator: ValidatorOrchestrator,
    aggregator: ConsensusAggregator,
}

impl VerificationService {
    pub fn new(
        config: QuorumConfig,
        verify_oracle: SharedOracle,
        answer_oracle: Option<SharedOracle>,
    ) -> VerifyResult<Self> {
        config.validate()?;

        let limiter = RateLimiter::from_config(&config.rate_limit).shared();
        let tracker = ProgressTracker::new(config.progress.clone());
        let orchestrator = ValidatorOrchestrator::new(
            verify_oracle.clone(),
            limiter.clone(),
            tracker.clone(),
            config.retry.clone(),
            config.panel.clone(),
        );

        Ok(Self {
            config,
            verify_oracle,
            answer_oracle,
            limiter,
            tracker,
            orchestrator,
            aggregator: ConsensusAggregator::default(),
        })
    }

    /// Build Gemini oracles from the configured API keys.
    ///
    /// The verify key is required; the answer key is optional.
    pub fn from_config(config: QuorumConfig) -> VerifyResult<Self> {
        let verify = GeminiOracle::verifier(&config.gemini)?
            .ok_or(VerifyError::NotConfigured("verify"))?;
        let answer = GeminiOracle::answerer(&config.gemini)?;
        info!(
            model = %verify.model(),
            answer_configured = answer.is_some(),
            "Gemini oracles configured"
        );

        Self::new(
            config,
            Arc::new(verify),
            answer.map(|a| Arc::new(a) as SharedOracle),
        )
    }

    pub fn with_panel(mut self, panel: ValidatorPanel) -> Self {
        self.orchestrator = self.orchestrator.with_panel(panel);
        self
    }

    pub fn with_aggregator(mut self, aggregator: ConsensusAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn shared(self) -> SharedVerificationService {
        Arc::new(self)
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn new_session_id() -> String {
        format!("session_{}", Uuid::new_v4().simple())
    }

    /// Run the full panel over every proposition and aggregate the verdicts.
    ///
    /// Fails only on invalid input or when the session id is already running.
    /// Individual validator failures appear as failed votes in the report.
    pub async fn verify(&self, request: VerificationRequest) -> VerifyResult<VerificationReport> {
        let session_id = request
            .session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(Self::new_session_id);

        let start = Instant::now();
        let panels = self
            .orchestrator
            .verify(&request.propositions, &session_id)
            .await?;

        let results: Vec<PropositionReport> = panels
            .into_iter()
            .map(|panel| PropositionReport {
                analysis: self.aggregator.analyze_panel(&panel),
                proposition: panel.proposition,
                validators: panel.results,
            })
            .collect();
        let analyses: Vec<ConsensusAnalysis> = results.iter().map(|r| r.analysis.clone()).collect();
        let summary = self.aggregator.summarize(&analyses);
        let answer_quality = self.aggregator.answer_quality(&summary);

        let total_units = results.iter().map(|r| r.validators.len()).sum();
        let failed_units = results.iter().map(|r| r.analysis.votes.failed).sum();

        info!(
            session_id = %session_id,
            consensus_reached = summary.consensus_reached,
            total = summary.total_propositions,
            score = answer_quality.overall_score,
            "Consensus analysis complete"
        );

        Ok(VerificationReport {
            session_id,
            results,
            summary,
            answer_quality,
            total_units,
            failed_units,
            elapsed_ms: start.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        })
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.tracker.status(session_id)
    }

    pub fn subscribe(&self, session_id: &str) -> ProgressSubscription {
        self.tracker.subscribe(session_id)
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    /// Ask the verify oracle to break `text` into checkable statements.
    pub async fn split_into_propositions(&self, text: &str) -> VerifyResult<Vec<String>> {
        if text.trim().is_empty() {
            return Err(VerifyError::InvalidInput("text to split is empty".into()));
        }
        let prompt = prompt::split_prompt(text.trim());
        let reply = self.query_with_retry(&self.verify_oracle, &prompt).await?;

        let propositions = prompt::extract_propositions(&reply);
        if propositions.is_empty() {
            return Err(VerifyError::NoPropositions);
        }
        info!(count = propositions.len(), "Split text into propositions");
        Ok(propositions)
    }

    /// Generate a short answer with the answer oracle.
    pub async fn generate_answer(&self, question: &str) -> VerifyResult<String> {
        let oracle = self
            .answer_oracle
            .as_ref()
            .ok_or(VerifyError::NotConfigured("answer"))?;
        let question = question.trim();
        if question.chars().count() < MIN_QUESTION_CHARS {
            return Err(VerifyError::InvalidInput(format!(
                "question must be at least {MIN_QUESTION_CHARS} characters"
            )));
        }
        self.query_with_retry(oracle, &prompt::answer_prompt(question))
            .await
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            verify_oracle: self.verify_oracle.name().to_string(),
            answer_oracle: self.answer_oracle.as_ref().map(|o| o.name().to_string()),
            rate_limit: self.limiter.status(),
            active_sessions: self.tracker.session_count(),
        }
    }

    async fn query_with_retry(&self, oracle: &SharedOracle, prompt: &str) -> VerifyResult<String> {
        let executor = BackoffExecutor::new(self.config.retry.clone(), self.limiter.clone());
        let reply = executor.execute_with_retry(|| oracle.query(prompt)).await?;
        Ok(reply.as_text().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::oracle::{MockOracleClient, OracleReply};
    use crate::progress::{ProgressSnapshot, Step};

    fn mock_with(reply: &'static str) -> MockOracleClient {
        let mut mock = MockOracleClient::new();
        mock.expect_query()
            .returning(move |_| Ok(OracleReply::text(reply)));
        mock.expect_name().return_const("mock".to_string());
        mock
    }

    fn service(verify: MockOracleClient, answer: Option<MockOracleClient>) -> VerificationService {
        let mut config = QuorumConfig::default();
        config.rate_limit.requests_per_window = 1000;
        config.panel.batch_delay_ms = 0;
        VerificationService::new(
            config,
            Arc::new(verify),
            answer.map(|a| Arc::new(a) as SharedOracle),
        )
        .unwrap()
    }

    #[test]
    fn test_session_id_format() {
        let id = VerificationService::new_session_id();
        assert!(id.starts_with("session_"));
        assert_ne!(id, VerificationService::new_session_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_builds_report() {
        let svc = service(mock_with("VERDICT: TRUE\nCONFIDENCE: 80\nREASONING: fine"), None);
        let report = svc
            .verify(VerificationRequest::new(vec!["A".into(), "B".into()]).with_session_id("client-1"))
            .await
            .unwrap();

        assert_eq!(report.session_id, "client-1");
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.total_units, 32);
        assert_eq!(report.failed_units, 0);
        assert_eq!(report.summary.consensus_reached, 2);
        assert_eq!(report.summary.unanimous_decisions, 2);
        assert_eq!(report.answer_quality.overall_score, 92);
        assert_eq!(svc.status("client-1").unwrap().current_step, Step::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_session_id() {
        let svc = service(mock_with("VERDICT: FALSE"), None);
        let report = svc.verify(VerificationRequest::new(vec!["A".into()])).await.unwrap();
        assert!(report.session_id.starts_with("session_"));
        assert!(svc.status(&report.session_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_leaves_no_session() {
        let svc = service(MockOracleClient::new(), None);
        let err = svc
            .verify(VerificationRequest::new(vec![]).with_session_id("s"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidInput(_)));
        assert!(svc.status("s").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_session_id_rejected() {
        let svc = service(MockOracleClient::new(), None);
        svc.tracker()
            .update("busy", ProgressSnapshot::verifying("busy", 1, 16));

        let err = svc
            .verify(VerificationRequest::new(vec!["A".into()]).with_session_id("busy"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Setup(_)));

        // the running session keeps its progress; no error snapshot is written
        let snapshot = svc.tracker().snapshot("busy").unwrap();
        assert_eq!(snapshot.step, Step::Verifying);
        assert_eq!(snapshot.completed_units, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_into_propositions() {
        let svc = service(mock_with("- The Earth orbits the Sun.\n- Water is H2O."), None);
        let props = svc.split_into_propositions("Some answer.").await.unwrap();
        assert_eq!(props, vec!["The Earth orbits the Sun.", "Water is H2O."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_without_bullets() {
        let svc = service(mock_with("Nothing to split."), None);
        let err = svc.split_into_propositions("text").await.unwrap_err();
        assert!(matches!(err, VerifyError::NoPropositions));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_requires_oracle() {
        let svc = service(MockOracleClient::new(), None);
        let err = svc.generate_answer("Why is the sky blue?").await.unwrap_err();
        assert!(matches!(err, VerifyError::NotConfigured("answer")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_generation() {
        let mut answer = MockOracleClient::new();
        answer
            .expect_query()
            .withf(|p| p.contains("Why is the sky blue?"))
            .returning(|_| Ok(OracleReply::text("  Rayleigh scattering.  ")));
        let svc = service(MockOracleClient::new(), Some(answer));

        assert_eq!(
            svc.generate_answer("Why is the sky blue?").await.unwrap(),
            "Rayleigh scattering."
        );
        assert!(matches!(
            svc.generate_answer("Why").await,
            Err(VerifyError::InvalidInput(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_surfaces_fatal_error() {
        let mut mock = MockOracleClient::new();
        mock.expect_query()
            .times(1)
            .returning(|_| Err(OracleError::Fatal("bad request".into())));
        let svc = service(mock, None);

        let err = svc.split_into_propositions("text").await.unwrap_err();
        assert!(matches!(err, VerifyError::Oracle(OracleError::Fatal(_))));
    }

    #[test]
    fn test_health_reports_oracles() {
        let mut answer = MockOracleClient::new();
        answer.expect_name().return_const("answers".to_string());
        let svc = service(mock_with(""), Some(answer));

        let health = svc.health();
        assert_eq!(health.verify_oracle, "mock");
        assert_eq!(health.answer_oracle.as_deref(), Some("answers"));
        assert!(health.can_answer());
        assert_eq!(health.rate_limit.limit, 1000);
    }

    #[test]
    fn test_from_config_requires_verify_key() {
        let mut config = QuorumConfig::default();
        config.gemini.verify_api_key = None;
        assert!(matches!(
            VerificationService::from_config(config),
            Err(VerifyError::NotConfigured("verify"))
        ));
    }
}
