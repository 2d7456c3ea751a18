//! The decision oracle: a narrow, structured ask/answer interface to an LLM.
//!
//! The search core only ever asks bounded questions (pick one of these
//! candidates, map these labels, split this sentence) and validates every
//! answer against the allowed set before using it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

mod gate;
mod openai;
mod prompt;
mod question;

pub use gate::{GatedOracle, OracleGate};
pub use openai::OpenAiOracle;
pub use prompt::{parse_answer, render};
pub use question::{DecisionAnswer, DecisionQuery, Question, Segment};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle rate limit hit")]
    RateLimited { retry_after: Option<Duration> },
    #[error("oracle authentication failed: {0}")]
    AuthFailed(String),
    #[error("oracle call timed out")]
    Timeout,
    #[error("malformed oracle answer: {0}")]
    Malformed(String),
    #[error("oracle transport failure: {0}")]
    Transport(String),
}

impl OracleError {
    /// Failures that a later, rephrased attempt may get past.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout | Self::Transport(_))
    }
}

// ── Oracle contract ──────────────────────────────────────────────────────────

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn ask(&self, question: &Question) -> Result<DecisionAnswer, OracleError>;
}

#[async_trait]
impl<T: DecisionOracle + ?Sized> DecisionOracle for Arc<T> {
    async fn ask(&self, question: &Question) -> Result<DecisionAnswer, OracleError> {
        (**self).ask(question).await
    }
}

// ── Structured output extraction ──────────────────────────────────────────────

/// Pull a JSON value out of an LLM reply.
///
/// Tries, in order: a fenced ` ```json ` block, any other fenced block, then
/// the span from the first `{` to the last `}`.  Returns `None` when none of
/// them parses.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    for fence in ["```json", "```"] {
        let mut rest = response;
        while let Some(start) = rest.find(fence) {
            let body = &rest[start + fence.len()..];
            let Some(end) = body.find("```") else {
                break;
            };
            if let Ok(value) = serde_json::from_str(body[..end].trim()) {
                return Some(value);
            }
            rest = &body[end + 3..];
        }
    }

    let trimmed = response.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Choice {
        choice: Option<String>,
    }

    #[test]
    fn extract_fenced_json() {
        let raw = "Sure!\n```json\n{\"choice\":\"Film Capacitors\"}\n```";
        let out = extract_json_output::<Choice>(raw).unwrap();
        assert_eq!(out.choice.as_deref(), Some("Film Capacitors"));
    }

    #[test]
    fn extract_untagged_fence() {
        let raw = "```\n{\"choice\": null}\n```";
        let out = extract_json_output::<Choice>(raw).unwrap();
        assert!(out.choice.is_none());
    }

    #[test]
    fn extract_skips_unparsable_fence() {
        let raw = "```json\n{oops}\n```\nthen\n```json\n{\"choice\":\"b\"}\n```";
        let out = extract_json_output::<Choice>(raw).unwrap();
        assert_eq!(out.choice.as_deref(), Some("b"));
    }

    #[test]
    fn extract_bare_json_with_surrounding_text() {
        let raw = "I pick {\"choice\":\"x\"} because it fits";
        let out = extract_json_output::<Choice>(raw).unwrap();
        assert_eq!(out.choice.as_deref(), Some("x"));
    }

    #[test]
    fn extract_returns_none_for_plain_or_split_objects() {
        assert!(extract_json_output::<Choice>("no json here").is_none());
        assert!(extract_json_output::<Choice>("").is_none());
        assert!(extract_json_output::<Choice>(r#"{"choice":"a"} and {"choice":"b"}"#).is_none());
    }

    #[test]
    fn only_throttling_and_transport_are_retryable() {
        assert!(OracleError::RateLimited { retry_after: None }.is_retryable());
        assert!(OracleError::Timeout.is_retryable());
        assert!(!OracleError::AuthFailed("401".to_string()).is_retryable());
        assert!(!OracleError::Malformed("x".to_string()).is_retryable());
    }
}
