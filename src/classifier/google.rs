//! Google-compatible `generateContent` backend.

use super::client::ClassifierHttpClient;
use super::{parse_verdict, ClassificationContext, LlmEvaluationResult, LlmService};
use crate::{Error, Result};

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Classifier backed by a Google-compatible `models/{model}:generateContent` endpoint.
pub struct GoogleClassifier {
    client: ClassifierHttpClient,
    api_key: String,
    model: String,
}

impl GoogleClassifier {
    /// Create a classifier against the public endpoint.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ClassifierHttpClient::new("google", DEFAULT_ENDPOINT, timeout)?,
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
        self.client = ClassifierHttpClient::new("google", endpoint, timeout)?;
        Ok(self)
    }
}

fn reply_text(reply: &serde_json::Value) -> Result<String> {
    let text: String = reply
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(Error::classifier_format("google reply has no candidate text"));
    }
    Ok(text)
}

#[async_trait]
impl LlmService for GoogleClassifier {
    async fn evaluate(&self, text: &str, context: &ClassificationContext) -> Result<LlmEvaluationResult> {
        let body = json!({
            "systemInstruction": {"parts": [{"text": context.system_prompt}]},
            "contents": [
                {"role": "user", "parts": [{"text": format!("Content to evaluate:\n\n{}", text)}]},
            ],
            "generationConfig": {"temperature": 0, "responseMimeType": "application/json"},
        });

        let request = self
            .client
            .post(&format!("/models/{}:generateContent", self.model), &body)
            .query(&[("key", self.api_key.as_str())]);

        let reply = self.client.send(request).await?;
        parse_verdict(&reply_text(&reply)?)
    }

    fn name(&self) -> &str {
        "google"
    }
}
