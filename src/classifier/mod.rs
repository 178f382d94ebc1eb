//! Intent classifier — the hosted-model call behind routing.
//!
//! The [`IntentClassifier`] trait wraps a single operation: send a prompt,
//! get back raw text. The text is expected to contain one JSON object but
//! callers must treat it as an untrusted suggestion; validation lives in
//! [`intent`] and extraction in [`extract`].

pub mod extract;
pub mod intent;

pub use extract::{extract_json, Extraction};
pub use intent::{parse_intent, ActionId, IntentGuess};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::error::{Result, WardenError};

/// A hosted text-generation model used for intent classification.
///
/// Implementations must apply a bounded request timeout; expiry surfaces
/// as `WardenError::Classifier`, which the router treats the same as
/// unparsable output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Send `prompt` to the model named by `model_hint`, returning raw text.
    async fn classify(&self, prompt: &str, model_hint: &str) -> Result<String>;
}

// ============================================================================
// OpenAI-compatible HTTP classifier
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Classifier backed by an OpenAI-compatible chat completions endpoint.
pub struct HttpClassifier {
    api_key: String,
    api_base: String,
    default_model: String,
    client: Client,
}

impl HttpClassifier {
    /// Build a classifier from config, with the configured request timeout.
    ///
    /// # Errors
    /// Returns a classifier error if the HTTP client cannot be built.
    pub fn from_config(cfg: &ClassifierConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| WardenError::Classifier(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: cfg.api_key.clone(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            default_model: cfg.model.clone(),
            client,
        })
    }

    /// Build a classifier against a custom base URL with a caller-supplied
    /// client. Useful for OpenAI-compatible local models and tests.
    pub fn with_client(api_key: &str, api_base: &str, model: &str, client: Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model: model.to_string(),
            client,
        }
    }
}

#[async_trait]
impl IntentClassifier for HttpClassifier {
    async fn classify(&self, prompt: &str, model_hint: &str) -> Result<String> {
        let model = if model_hint.is_empty() {
            self.default_model.clone()
        } else {
            model_hint.to_string()
        };

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            // Classification wants the most likely label, not creativity
            temperature: 0.0,
        };

        debug!(model = %request.model, "sending classification request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| WardenError::Classifier(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WardenError::Classifier(format!(
                "HTTP {status}: {}",
                crate::utils::string::preview(&body, 200)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| WardenError::Classifier(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| WardenError::Classifier("empty completion".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_classifier_from_config() {
        let cfg = ClassifierConfig::default();
        let classifier = HttpClassifier::from_config(&cfg).unwrap();
        assert_eq!(classifier.api_base, "https://api.openai.com/v1");
        assert_eq!(classifier.default_model, "gpt-4o-mini");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let classifier =
            HttpClassifier::with_client("k", "http://localhost:8080/v1/", "m", Client::new());
        assert_eq!(classifier.api_base, "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_mock_classifier() {
        let mut mock = MockIntentClassifier::new();
        mock.expect_classify()
            .returning(|_, _| Ok(r#"{"action":"poll","confidence":0.8}"#.to_string()));
        let raw = mock.classify("prompt", "model").await.unwrap();
        let guess = parse_intent(&raw).unwrap();
        assert_eq!(guess.action, ActionId::Poll);
    }
}
