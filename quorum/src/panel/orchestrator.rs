//! Bounded-parallel validator fan-out
//!
//! ```text
//! propositions × panel  →  units (proposition-major, panel order)
//!   chunks(batch_size)  →  JoinSet per batch, pacing sleep between batches
//!   each unit           →  BackoffExecutor → oracle → verdict | failed vote
//!   each completion     →  tracker.update(completed / total)
//! ```
//!
//! ## Partial failure policy
//!
//! A validator that exhausts its retries, hits a fatal oracle error, or
//! panics is recorded as a failed vote. The remaining validators and
//! propositions always run to completion.

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{prompt, PropositionPanel, ValidatorPanel, ValidatorResult, ValidatorSpec};
use crate::config::{PanelConfig, RetryPolicy};
use crate::error::{VerifyError, VerifyResult};
use crate::oracle::SharedOracle;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::resilience::{BackoffExecutor, SharedRateLimiter};

pub struct ValidatorOrchestrator {
    oracle: SharedOracle,
    limiter: SharedRateLimiter,
    tracker: ProgressTracker,
    panel: Arc<ValidatorPanel>,
    retry: RetryPolicy,
    config: PanelConfig,
}

impl ValidatorOrchestrator {
    /// Orchestrator over the standard sixteen-validator panel.
    pub fn new(
        oracle: SharedOracle,
        limiter: SharedRateLimiter,
        tracker: ProgressTracker,
        retry: RetryPolicy,
        config: PanelConfig,
    ) -> Self {
        Self {
            oracle,
            limiter,
            tracker,
            panel: Arc::new(ValidatorPanel::standard()),
            retry,
            config,
        }
    }

    pub fn with_panel(mut self, panel: ValidatorPanel) -> Self {
        self.panel = Arc::new(panel);
        self
    }

    pub fn panel(&self) -> &ValidatorPanel {
        &self.panel
    }

    /// Total units a request of `propositions` propositions will run.
    pub fn total_units(&self, propositions: usize) -> usize {
        self.panel.len() * propositions
    }

    /// Run every validator against every proposition.
    ///
    /// Returns one panel per proposition, in input order, each holding one
    /// result per validator in panel order. Only invalid input, or a session
    /// id that is still running, is an error.
    pub async fn verify(
        &self,
        propositions: &[String],
        session_id: &str,
    ) -> VerifyResult<Vec<PropositionPanel>> {
        if propositions.is_empty() {
            return Err(VerifyError::InvalidInput("no propositions submitted".into()));
        }
        if let Some(i) = propositions.iter().position(|p| p.trim().is_empty()) {
            return Err(VerifyError::InvalidInput(format!("proposition {} is empty", i + 1)));
        }
        if self.panel.is_empty() {
            return Err(VerifyError::InvalidInput("validator panel is empty".into()));
        }

        let panel_size = self.panel.len();
        let total = self.total_units(propositions.len());
        let batch_size = self.config.batch_size.max(1);
        let start = Instant::now();

        if !self.tracker.begin(session_id, total) {
            return Err(VerifyError::Setup(format!(
                "session {session_id} is already running"
            )));
        }
        info!(
            session_id,
            propositions = propositions.len(),
            units = total,
            batch_size,
            "Starting verification"
        );

        let texts: Vec<Arc<str>> = propositions.iter().map(|p| Arc::from(p.trim())).collect();
        let mut slots: Vec<Option<ValidatorResult>> = vec![None; total];
        let mut completed = 0usize;

        for (batch_no, batch_start) in (0..total).step_by(batch_size).enumerate() {
            if batch_no > 0 && !self.config.batch_delay().is_zero() {
                tokio::time::sleep(self.config.batch_delay()).await;
            }

            let batch_end = (batch_start + batch_size).min(total);
            let mut join_set: JoinSet<(usize, ValidatorResult)> = JoinSet::new();

            for unit in batch_start..batch_end {
                let spec = self.panel.validators()[unit % panel_size].clone();
                let proposition = texts[unit / panel_size].clone();
                let oracle = self.oracle.clone();
                let executor = BackoffExecutor::new(self.retry.clone(), self.limiter.clone());

                join_set.spawn(async move {
                    let result = run_validator(&oracle, &executor, &spec, &proposition).await;
                    (unit, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((unit, result)) => slots[unit] = Some(result),
                    // Slot stays empty and is filled as a failure below.
                    Err(e) => warn!(session_id, error = %e, "Validator task aborted"),
                }
                completed += 1;
                self.tracker.update(
                    session_id,
                    ProgressSnapshot::verifying(session_id, completed, total),
                );
            }
            debug!(session_id, batch = batch_no + 1, completed, total, "Batch finished");
        }

        let mut panels: Vec<PropositionPanel> = texts
            .iter()
            .map(|text| PropositionPanel {
                proposition: text.to_string(),
                results: Vec::with_capacity(panel_size),
            })
            .collect();
        for (unit, slot) in slots.into_iter().enumerate() {
            let result = slot.unwrap_or_else(|| {
                let spec = &self.panel.validators()[unit % panel_size];
                ValidatorResult::failed(spec, format!("{} did not complete", spec.name), 0, 0)
            });
            panels[unit / panel_size].results.push(result);
        }

        let failed: usize = panels.iter().map(PropositionPanel::failed_count).sum();
        info!(
            session_id,
            units = total,
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Verification complete"
        );
        self.tracker
            .update(session_id, ProgressSnapshot::completed(session_id, total));

        Ok(panels)
    }
}

/// One validator, one proposition: a retried oracle call and a parsed verdict.
async fn run_validator(
    oracle: &SharedOracle,
    executor: &BackoffExecutor,
    spec: &ValidatorSpec,
    proposition: &str,
) -> ValidatorResult {
    let start = Instant::now();
    let prompt = prompt::validator_prompt(spec, proposition);
    let mut calls: u32 = 0;

    let outcome = executor
        .execute_with_retry(|| {
            calls += 1;
            oracle.query(&prompt)
        })
        .await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(reply) => {
            let verdict = reply.into_verdict();
            debug!(
                validator = %spec.id,
                verdict = verdict.verdict,
                confidence = verdict.confidence,
                calls,
                "Validator finished"
            );
            ValidatorResult {
                id: spec.id.clone(),
                name: spec.name.clone(),
                category: spec.category,
                verdict: verdict.verdict,
                confidence: verdict.confidence,
                reasoning: verdict.reasoning,
                succeeded: true,
                attempts: calls,
                elapsed_ms,
            }
        }
        Err(e) => {
            warn!(validator = %spec.id, calls, error = %e, "Validator failed");
            ValidatorResult::failed(spec, format!("{} unavailable: {}", spec.name, e), calls, elapsed_ms)
        }
    }
}
