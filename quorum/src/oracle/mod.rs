//! Oracle abstraction
//!
//! An oracle is any text-generation service that answers a prompt. The
//! verification pipeline only needs one operation, [`OracleClient::query`],
//! and a failure classification ([`OracleError`]) to drive retries.

pub mod gemini;
pub mod verdict;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::OracleError;

pub use gemini::GeminiOracle;
pub use verdict::{parse_verdict, Verdict};

/// Shared handle to an oracle implementation
pub type SharedOracle = Arc<dyn OracleClient>;

/// What an oracle returned for a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleReply {
    /// Free-form generated text.
    Text { text: String },
    /// Oracle already produced a structured judgment.
    Verdict(Verdict),
}

impl OracleReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Raw text of the reply. Structured verdicts render their reasoning.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Verdict(v) => &v.reasoning,
        }
    }

    /// Interpret the reply as a verdict, parsing text if needed.
    pub fn into_verdict(self) -> Verdict {
        match self {
            Self::Text { text } => parse_verdict(&text),
            Self::Verdict(v) => v.normalized(),
        }
    }
}

/// A judgment service reachable through a single query operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Short identifier used in logs and health output.
    fn name(&self) -> &str;

    async fn query(&self, prompt: &str) -> Result<OracleReply, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_reply_parses_to_verdict() {
        let reply = OracleReply::text("VERDICT: TRUE\nCONFIDENCE: 88\nREASONING: Well documented.");
        let v = reply.into_verdict();
        assert!(v.verdict);
        assert_eq!(v.confidence, 88);
        assert_eq!(v.reasoning, "Well documented.");
    }

    #[test]
    fn test_structured_reply_is_clamped() {
        let reply = OracleReply::Verdict(Verdict {
            verdict: false,
            confidence: 140,
            reasoning: "  padded  ".into(),
        });
        let v = reply.into_verdict();
        assert_eq!(v.confidence, 100);
        assert_eq!(v.reasoning, "padded");
    }

    #[tokio::test]
    async fn test_mock_oracle() {
        let mut mock = MockOracleClient::new();
        mock.expect_query()
            .withf(|p| p.contains("Paris"))
            .returning(|_| Ok(OracleReply::text("VERDICT: TRUE")));
        mock.expect_name().return_const("mock".to_string());

        let oracle: SharedOracle = Arc::new(mock);
        let reply = oracle.query("Paris is the capital of France").await.unwrap();
        assert_eq!(reply.as_text(), "VERDICT: TRUE");
        assert_eq!(oracle.name(), "mock");
    }
}
