//! Verdict extraction from oracle text
//!
//! Oracles are asked for a strict format, but replies drift. Parsing tries,
//! in order: a JSON object, the `VERDICT:` / `CONFIDENCE:` / `REASONING:`
//! line format, and finally a keyword heuristic.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Confidence used when the oracle gives none.
pub const DEFAULT_CONFIDENCE: u8 = 50;

/// Longest reasoning kept per verdict, in characters.
pub const MAX_REASONING_CHARS: usize = 200;

/// A single true/false judgment with confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: bool,
    /// 0-100
    pub confidence: u8,
    pub reasoning: String,
}

impl Verdict {
    /// Clamp confidence and tidy reasoning.
    pub fn normalized(self) -> Self {
        Self {
            verdict: self.verdict,
            confidence: self.confidence.min(100),
            reasoning: truncate_chars(self.reasoning.trim(), MAX_REASONING_CHARS),
        }
    }
}

#[derive(Deserialize)]
struct JsonVerdict {
    #[serde(alias = "isTrue", alias = "is_true")]
    verdict: serde_json::Value,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

static VERDICT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\**VERDICT\**\s*:\s*\**\s*\[?\s*(TRUE|FALSE)")
        .expect("VERDICT_LINE_RE regex should compile")
});
static CONFIDENCE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\**CONFIDENCE\**\s*:\s*\**\s*\[?\s*(\d{1,3})")
        .expect("CONFIDENCE_LINE_RE regex should compile")
});
static REASONING_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ims)^\s*\**REASONING\**\s*:\s*\**\s*\[?\s*(.+)")
        .expect("REASONING_LINE_RE regex should compile")
});

static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(false|incorrect|inaccurate|wrong|invalid|untrue)\b")
        .expect("NEGATIVE_RE regex should compile")
});
static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(true|correct|accurate|right|valid)\b")
        .expect("POSITIVE_RE regex should compile")
});
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})\s*%?").expect("NUMBER_RE regex should compile"));

/// Parse an oracle reply into a [`Verdict`]. Never fails.
pub fn parse_verdict(text: &str) -> Verdict {
    let text = text.trim();
    parse_json(text)
        .or_else(|| parse_lines(text))
        .unwrap_or_else(|| parse_keywords(text))
        .normalized()
}

fn parse_json(text: &str) -> Option<Verdict> {
    let body = strip_code_fence(text);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: JsonVerdict = serde_json::from_str(&body[start..=end]).ok()?;

    let verdict = match &parsed.verdict {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => return None,
    };
    let confidence = parsed
        .confidence
        .as_ref()
        .and_then(|c| match c {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
            _ => None,
        })
        .map(clamp_confidence)
        .unwrap_or(DEFAULT_CONFIDENCE);

    Some(Verdict {
        verdict,
        confidence,
        reasoning: parsed
            .reasoning
            .unwrap_or_else(|| "No reasoning provided".to_string()),
    })
}

fn parse_lines(text: &str) -> Option<Verdict> {
    let verdict = VERDICT_LINE_RE
        .captures(text)?
        .get(1)?
        .as_str()
        .eq_ignore_ascii_case("true");
    let confidence = CONFIDENCE_LINE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(clamp_confidence)
        .unwrap_or(DEFAULT_CONFIDENCE);
    let reasoning = REASONING_LINE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(']').trim().to_string())
        .unwrap_or_default();

    Some(Verdict {
        verdict,
        confidence,
        reasoning,
    })
}

fn parse_keywords(text: &str) -> Verdict {
    let verdict = !NEGATIVE_RE.is_match(text) && POSITIVE_RE.is_match(text);
    let confidence = NUMBER_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(clamp_confidence)
        .unwrap_or(DEFAULT_CONFIDENCE);

    Verdict {
        verdict,
        confidence,
        reasoning: text.to_string(),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    match t.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.trim_start_matches("json");
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => t,
    }
}

fn clamp_confidence(value: f64) -> u8 {
    if value.is_nan() {
        return DEFAULT_CONFIDENCE;
    }
    value.round().clamp(0.0, 100.0) as u8
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let v = parse_verdict(
            "VERDICT: FALSE\nCONFIDENCE: 92%\nREASONING: The Great Wall is not visible from orbit.",
        );
        assert!(!v.verdict);
        assert_eq!(v.confidence, 92);
        assert!(v.reasoning.starts_with("The Great Wall"));
    }

    #[test]
    fn test_line_format_with_markdown_and_brackets() {
        let v = parse_verdict("**VERDICT:** [TRUE]\n**CONFIDENCE:** [75]\n**REASONING:** [Consistent.]");
        assert!(v.verdict);
        assert_eq!(v.confidence, 75);
        assert_eq!(v.reasoning, "Consistent.");
    }

    #[test]
    fn test_json_object() {
        let v = parse_verdict(r#"{"isTrue": true, "confidence": 81, "reasoning": "Textbook fact"}"#);
        assert!(v.verdict);
        assert_eq!(v.confidence, 81);
        assert_eq!(v.reasoning, "Textbook fact");
    }

    #[test]
    fn test_json_in_code_fence() {
        let v = parse_verdict("```json\n{\"isTrue\": false, \"confidence\": \"60\"}\n```");
        assert!(!v.verdict);
        assert_eq!(v.confidence, 60);
        assert_eq!(v.reasoning, "No reasoning provided");
    }

    #[test]
    fn test_keyword_fallback() {
        let v = parse_verdict("This statement is accurate, roughly 70% sure.");
        assert!(v.verdict);
        assert_eq!(v.confidence, 70);

        let v = parse_verdict("That is incorrect.");
        assert!(!v.verdict);
        assert_eq!(v.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_confidence_clamped() {
        let v = parse_verdict("VERDICT: TRUE\nCONFIDENCE: 250");
        assert_eq!(v.confidence, 100);
        let v = parse_verdict(r#"{"verdict": true, "confidence": -5}"#);
        assert_eq!(v.confidence, 0);
    }

    #[test]
    fn test_reasoning_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_REASONING_CHARS + 50);
        let v = parse_verdict(&format!("VERDICT: TRUE\nREASONING: {long}"));
        assert_eq!(v.reasoning.chars().count(), MAX_REASONING_CHARS);
    }

    #[test]
    fn test_garbage_is_false_with_default_confidence() {
        let v = parse_verdict("");
        assert!(!v.verdict);
        assert_eq!(v.confidence, DEFAULT_CONFIDENCE);
    }
}
