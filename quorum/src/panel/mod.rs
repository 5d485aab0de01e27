//! Validator panels
//!
//! A panel is a fixed, ordered list of validators. Each validator looks at a
//! proposition from one angle (its category) and casts a single verdict.
//! The standard panel has sixteen validators, four per category.

pub mod orchestrator;
pub mod prompt;

use serde::{Deserialize, Serialize};

pub use orchestrator::ValidatorOrchestrator;

/// Angle a validator judges from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorCategory {
    Logic,
    Fact,
    Context,
    Comprehensive,
}

impl ValidatorCategory {
    pub const ALL: [ValidatorCategory; 4] = [
        Self::Logic,
        Self::Fact,
        Self::Context,
        Self::Comprehensive,
    ];

    /// Category-specific instruction added to the validator prompt.
    pub fn focus(&self) -> &'static str {
        match self {
            Self::Logic => {
                "Focus on logical consistency, reasoning validity, and detecting contradictions. \
                 Check if the proposition follows logical principles."
            }
            Self::Fact => {
                "Focus on factual accuracy, data verification, and source reliability. \
                 Check if the proposition is factually correct."
            }
            Self::Context => {
                "Focus on contextual appropriateness, historical accuracy, and domain-specific \
                 knowledge. Check if the proposition fits the proper context."
            }
            Self::Comprehensive => {
                "Focus on overall assessment, bias detection, and completeness. \
                 Provide a comprehensive evaluation of the proposition."
            }
        }
    }
}

impl std::fmt::Display for ValidatorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logic => write!(f, "logic"),
            Self::Fact => write!(f, "fact"),
            Self::Context => write!(f, "context"),
            Self::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSpec {
    /// Stable identifier, e.g. `fact-2`.
    pub id: String,
    pub name: String,
    pub category: ValidatorCategory,
}

impl ValidatorSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: ValidatorCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
        }
    }
}

/// Ordered validator list. Order is preserved in every result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorPanel {
    validators: Vec<ValidatorSpec>,
}

impl ValidatorPanel {
    pub fn new(validators: Vec<ValidatorSpec>) -> Self {
        Self { validators }
    }

    /// The sixteen-validator panel, grouped by category.
    pub fn standard() -> Self {
        const NAMES: [(ValidatorCategory, [&str; 4]); 4] = [
            (
                ValidatorCategory::Logic,
                [
                    "Logical Consistency",
                    "Causal Relationship",
                    "Reasoning Validity",
                    "Contradiction Detection",
                ],
            ),
            (
                ValidatorCategory::Fact,
                [
                    "Factual Accuracy",
                    "Data Verification",
                    "Statistical Analysis",
                    "Source Verification",
                ],
            ),
            (
                ValidatorCategory::Context,
                [
                    "Context Appropriateness",
                    "Historical Background",
                    "Cultural Context",
                    "Domain Expertise",
                ],
            ),
            (
                ValidatorCategory::Comprehensive,
                [
                    "Bias Detection",
                    "Completeness",
                    "Reliability",
                    "Overall Assessment",
                ],
            ),
        ];

        let validators = NAMES
            .iter()
            .flat_map(|(category, names)| {
                names.iter().enumerate().map(move |(i, name)| {
                    ValidatorSpec::new(format!("{}-{}", category, i + 1), *name, *category)
                })
            })
            .collect();
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validators(&self) -> &[ValidatorSpec] {
        &self.validators
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorSpec> {
        self.validators.iter()
    }
}

impl Default for ValidatorPanel {
    fn default() -> Self {
        Self::standard()
    }
}

/// One validator's verdict on one proposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorResult {
    pub id: String,
    pub name: String,
    pub category: ValidatorCategory,
    pub verdict: bool,
    /// 0-100. Always 0 for failed validators.
    pub confidence: u8,
    pub reasoning: String,
    /// False when the oracle could not be reached after retries.
    pub succeeded: bool,
    /// Oracle calls made, including retries.
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl ValidatorResult {
    /// A failed vote: no verdict, zero confidence, the failure as reasoning.
    pub fn failed(spec: &ValidatorSpec, reason: impl Into<String>, attempts: u32, elapsed_ms: u64) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            category: spec.category,
            verdict: false,
            confidence: 0,
            reasoning: reason.into(),
            succeeded: false,
            attempts,
            elapsed_ms,
        }
    }
}

/// A proposition and its panel of results, in panel order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropositionPanel {
    pub proposition: String,
    pub results: Vec<ValidatorResult>,
}

impl PropositionPanel {
    pub fn panel_size(&self) -> usize {
        self.results.len()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.succeeded).count()
    }
}
