use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::json;
use tracing::debug;

use partfinder_config::OracleConfig;

use crate::prompt::{SYSTEM_PROMPT, parse_answer, render};
use crate::question::{DecisionAnswer, Question};
use crate::{DecisionOracle, OracleError};

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| OracleError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.trim().to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl DecisionOracle for OpenAiOracle {
    async fn ask(&self, question: &Question) -> Result<DecisionAnswer, OracleError> {
        if self.api_key.is_empty() {
            return Err(OracleError::AuthFailed(
                "no API key configured (set OPENAI_API_KEY or pass --api-key)".to_string(),
            ));
        }

        let payload = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": render(question)}
            ]
        });

        debug!(model = %self.model, attempt = question.attempt, "asking oracle");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                return Err(OracleError::AuthFailed(format!("{status}: {}", body.trim())));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(OracleError::RateLimited {
                    retry_after: retry_after(response.headers()),
                });
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(OracleError::Transport(format!("{status}: {}", body.trim())));
            }
            _ => {}
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout
            } else {
                OracleError::Malformed(format!("response body is not JSON: {e}"))
            }
        })?;

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| OracleError::Malformed(format!("response missing message content: {body}")))?;

        parse_answer(&question.query, content)?.validate(&question.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn endpoint_is_built_from_base_url() {
        let config = OracleConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..OracleConfig::default()
        };
        let oracle = OpenAiOracle::new(&config).unwrap();
        assert_eq!(oracle.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(oracle.model(), config.model);
    }

    #[tokio::test]
    async fn missing_key_fails_auth_without_a_request() {
        let oracle = OpenAiOracle::new(&OracleConfig::default()).unwrap();
        let q = Question::pick_one("category", "x", vec!["a".to_string()]);
        assert!(matches!(oracle.ask(&q).await, Err(OracleError::AuthFailed(_))));
    }

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }
}
