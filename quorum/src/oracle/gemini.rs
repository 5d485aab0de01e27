//! Gemini `generateContent` adapter
//!
//! Status mapping:
//! - 429 → [`OracleError::RateLimited`] with the `Retry-After` seconds, if any
//! - 5xx, 408, timeouts, connection errors, empty candidates → [`OracleError::Transient`]
//! - any other non-success → [`OracleError::Fatal`]

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{OracleClient, OracleReply};
use crate::config::GeminiSettings;
use crate::error::{OracleError, VerifyError, VerifyResult};

/// One Gemini model role (verify or answer) with its generation parameters.
#[derive(Clone)]
pub struct GeminiOracle {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl GeminiOracle {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        settings: &GeminiSettings,
        temperature: f32,
        max_output_tokens: u32,
    ) -> VerifyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| VerifyError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature,
            max_output_tokens,
            client,
        })
    }

    /// Low-temperature oracle for verdicts. `None` when no verify key is set.
    pub fn verifier(settings: &GeminiSettings) -> VerifyResult<Option<Self>> {
        match settings.verify_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Self::new(
                "gemini-verify",
                key,
                settings,
                settings.verify_temperature,
                settings.verify_max_tokens,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    /// Conversational oracle for answers. `None` when no answer key is set.
    pub fn answerer(settings: &GeminiSettings) -> VerifyResult<Option<Self>> {
        match settings.answer_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Self::new(
                "gemini-answer",
                key,
                settings,
                settings.answer_temperature,
                settings.answer_max_tokens,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

fn classify_status(status: reqwest::StatusCode, retry_after: Option<Duration>, body: String) -> OracleError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        OracleError::RateLimited { retry_after }
    } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
        OracleError::Transient(format!("Gemini API error ({status}): {body}"))
    } else {
        OracleError::Fatal(format!("Gemini API error ({status}): {body}"))
    }
}

#[async_trait]
impl OracleClient for GeminiOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, prompt: &str) -> Result<OracleReply, OracleError> {
        let request_body = serde_json::json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens
            }
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&request_body)
            .send()
            .await
            .map_err(|e| OracleError::Transient(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, body));
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OracleError::Transient(format!("unreadable response: {}", e.without_url())))?;

        let content = resp_json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OracleError::Transient("response contained no candidate text".into()))?;

        debug!(oracle = %self.name, chars = content.len(), "Gemini reply received");
        Ok(OracleReply::text(content))
    }
}
