//! Majority consensus over validator panels
//!
//! Analysis is a pure function of a panel: failed validators are counted but
//! cast no vote, and a side needs `ceil(panel_size / 2)` votes to carry.
//! Equal true/false counts are settled by an explicit [`TiePolicy`].

use serde::{Deserialize, Serialize};

use crate::panel::{PropositionPanel, ValidatorResult};

/// How a validator's entry counts in the tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    True,
    False,
    Failed,
}

impl From<&ValidatorResult> for Decision {
    fn from(r: &ValidatorResult) -> Self {
        match (r.succeeded, r.verdict) {
            (false, _) => Self::Failed,
            (true, true) => Self::True,
            (true, false) => Self::False,
        }
    }
}

/// Which way an equal true/false split leans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// Ties read as "not shown to be true".
    #[default]
    PreferFalse,
    PreferTrue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Votes {
    #[serde(rename = "true")]
    pub yes: usize,
    #[serde(rename = "false")]
    pub no: usize,
    pub failed: usize,
}

impl Votes {
    pub fn valid(&self) -> usize {
        self.yes + self.no
    }

    pub fn max_side(&self) -> usize {
        self.yes.max(self.no)
    }
}

/// Consensus metrics for one panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusAnalysis {
    pub votes: Votes,
    pub panel_size: usize,
    /// `ceil(panel_size / 2)`
    pub majority_threshold: usize,
    pub consensus_reached: bool,
    pub consensus: bool,
    /// Winning side's votes when consensus is reached, otherwise 0.
    pub majority_strength: usize,
    /// Mean confidence over valid votes, rounded; 0 with no valid votes.
    pub average_confidence: u8,
    pub unanimity: bool,
    /// `round(100 * max_side / valid)`; 0 with no valid votes.
    pub agreement_level: u8,
}

/// Rollup over all panels of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSummary {
    pub total_propositions: usize,
    pub consensus_reached: usize,
    pub unanimous_decisions: usize,
    pub strong_consensus: usize,
    pub true_consensus: usize,
    pub false_consensus: usize,
    pub no_consensus: usize,
    pub average_agreement_level: u8,
    pub average_confidence: u8,
}

/// Overall answer quality, each component in 0.0-1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerQuality {
    /// Share of propositions reaching consensus.
    pub verifiability: f64,
    /// Average confidence / 100.
    pub reliability: f64,
    /// Share of unanimous propositions.
    pub consistency: f64,
    /// `round(100 * (0.4 * verifiability + 0.4 * reliability + 0.2 * consistency))`
    pub overall_score: u8,
}

const VERIFIABILITY_WEIGHT: f64 = 0.4;
const RELIABILITY_WEIGHT: f64 = 0.4;
const CONSISTENCY_WEIGHT: f64 = 0.2;

/// Share of the panel the winning side must reach to count as strong.
pub const DEFAULT_STRONG_RATIO: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusAggregator {
    tie_policy: TiePolicy,
    strong_ratio: f64,
}

impl Default for ConsensusAggregator {
    fn default() -> Self {
        Self {
            tie_policy: TiePolicy::default(),
            strong_ratio: DEFAULT_STRONG_RATIO,
        }
    }
}

impl ConsensusAggregator {
    pub fn new(tie_policy: TiePolicy, strong_ratio: f64) -> Self {
        Self {
            tie_policy,
            strong_ratio: strong_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn tie_policy(&self) -> TiePolicy {
        self.tie_policy
    }

    pub fn analyze(&self, results: &[ValidatorResult]) -> ConsensusAnalysis {
        let mut votes = Votes::default();
        let mut confidence_sum: u64 = 0;
        for result in results {
            match Decision::from(result) {
                Decision::True => votes.yes += 1,
                Decision::False => votes.no += 1,
                Decision::Failed => {
                    votes.failed += 1;
                    continue;
                }
            }
            confidence_sum += u64::from(result.confidence.min(100));
        }

        let panel_size = results.len();
        let majority_threshold = panel_size.div_ceil(2);
        let valid = votes.valid();
        let max_side = votes.max_side();
        let consensus_reached = valid > 0 && max_side >= majority_threshold;

        let consensus = match votes.yes.cmp(&votes.no) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.tie_policy == TiePolicy::PreferTrue,
        };

        let (average_confidence, agreement_level) = if valid == 0 {
            (0, 0)
        } else {
            (
                ratio_percent(confidence_sum as f64, 100.0 * valid as f64),
                ratio_percent(max_side as f64, valid as f64),
            )
        };

        ConsensusAnalysis {
            votes,
            panel_size,
            majority_threshold,
            consensus_reached,
            consensus,
            majority_strength: if consensus_reached { max_side } else { 0 },
            average_confidence,
            unanimity: valid > 0 && max_side == valid,
            agreement_level,
        }
    }

    pub fn analyze_panel(&self, panel: &PropositionPanel) -> ConsensusAnalysis {
        self.analyze(&panel.results)
    }

    /// Whether an analysis clears the strong-majority bar.
    pub fn is_strong(&self, analysis: &ConsensusAnalysis) -> bool {
        let needed = (analysis.panel_size as f64 * self.strong_ratio).ceil() as usize;
        analysis.consensus_reached && analysis.majority_strength >= needed.max(1)
    }

    pub fn summarize(&self, analyses: &[ConsensusAnalysis]) -> ConsensusSummary {
        let total = analyses.len();
        if total == 0 {
            return ConsensusSummary::default();
        }

        let reached = analyses.iter().filter(|a| a.consensus_reached).count();
        let true_consensus = analyses
            .iter()
            .filter(|a| a.consensus_reached && a.consensus)
            .count();
        let agreement_sum: u64 = analyses.iter().map(|a| u64::from(a.agreement_level)).sum();
        let confidence_sum: u64 = analyses.iter().map(|a| u64::from(a.average_confidence)).sum();

        ConsensusSummary {
            total_propositions: total,
            consensus_reached: reached,
            unanimous_decisions: analyses.iter().filter(|a| a.unanimity).count(),
            strong_consensus: analyses.iter().filter(|a| self.is_strong(a)).count(),
            true_consensus,
            false_consensus: reached - true_consensus,
            no_consensus: total - reached,
            average_agreement_level: ratio_percent(agreement_sum as f64, 100.0 * total as f64),
            average_confidence: ratio_percent(confidence_sum as f64, 100.0 * total as f64),
        }
    }

    pub fn answer_quality(&self, summary: &ConsensusSummary) -> AnswerQuality {
        if summary.total_propositions == 0 {
            return AnswerQuality::default();
        }
        let total = summary.total_propositions as f64;
        let verifiability = summary.consensus_reached as f64 / total;
        let reliability = f64::from(summary.average_confidence) / 100.0;
        let consistency = summary.unanimous_decisions as f64 / total;
        let score = VERIFIABILITY_WEIGHT * verifiability
            + RELIABILITY_WEIGHT * reliability
            + CONSISTENCY_WEIGHT * consistency;

        AnswerQuality {
            verifiability,
            reliability,
            consistency,
            overall_score: (score * 100.0).round().clamp(0.0, 100.0) as u8,
        }
    }
}

/// `round(100 * num / den)` clamped to 0-100.
fn ratio_percent(num: f64, den: f64) -> u8 {
    if den <= 0.0 {
        return 0;
    }
    (100.0 * num / den).round().clamp(0.0, 100.0) as u8
}
