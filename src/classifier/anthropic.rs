//! Anthropic-compatible messages backend.

use super::client::ClassifierHttpClient;
use super::{parse_verdict, ClassificationContext, LlmEvaluationResult, LlmService};
use crate::{Error, Result};

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Classifier backed by an Anthropic-compatible `/v1/messages` endpoint.
pub struct AnthropicClassifier {
    client: ClassifierHttpClient,
    api_key: String,
    model: String,
}

impl AnthropicClassifier {
    /// Create a classifier against the public endpoint.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ClassifierHttpClient::new("anthropic", DEFAULT_ENDPOINT, timeout)?,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Use a different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at a compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: &str, timeout: Duration) -> Result<Self> {
        self.client = ClassifierHttpClient::new("anthropic", endpoint, timeout)?;
        Ok(self)
    }
}

/// Concatenated text of every `text` content block.
fn reply_text(reply: &serde_json::Value) -> Result<String> {
    let text: String = reply
        .get("content")
        .and_then(|c| c.as_array())
        .into_iter()
        .flatten()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(Error::classifier_format("anthropic reply has no text content"));
    }
    Ok(text)
}

#[async_trait]
impl LlmService for AnthropicClassifier {
    async fn evaluate(&self, text: &str, context: &ClassificationContext) -> Result<LlmEvaluationResult> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": context.system_prompt,
            "messages": [
                {"role": "user", "content": format!("Content to evaluate:\n\n{}", text)},
            ],
        });

        let request = self
            .client
            .post("/v1/messages", &body)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION);

        let reply = self.client.send(request).await?;
        parse_verdict(&reply_text(&reply)?)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
