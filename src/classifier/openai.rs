//! OpenAI-compatible chat completions backend.

use super::client::{text_at, ClassifierHttpClient};
use super::{parse_verdict, ClassificationContext, LlmEvaluationResult, LlmService};
use crate::Result;

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Classifier backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClassifier {
    client: ClassifierHttpClient,
    api_key: String,
    model: String,
}

impl OpenAiClassifier {
    /// Create a classifier against the public endpoint.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ClassifierHttpClient::new("openai", DEFAULT_ENDPOINT, timeout)?,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Use a different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at a compatible endpoint (base URL up to, not including, `/chat/completions`).
    pub fn with_endpoint(mut self, endpoint: &str, timeout: Duration) -> Result<Self> {
        self.client = ClassifierHttpClient::new("openai", endpoint, timeout)?;
        Ok(self)
    }
}

/// Request body shared by the OpenAI and Azure backends.
pub(crate) fn chat_body(model: Option<&str>, text: &str, context: &ClassificationContext) -> serde_json::Value {
    let mut body = json!({
        "messages": [
            {"role": "system", "content": context.system_prompt},
            {"role": "user", "content": format!("Content to evaluate:\n\n{}", text)},
        ],
        "temperature": 0,
        "response_format": {"type": "json_object"},
    });
    if let Some(model) = model {
        body["model"] = json!(model);
    }
    body
}

#[async_trait]
impl LlmService for OpenAiClassifier {
    async fn evaluate(&self, text: &str, context: &ClassificationContext) -> Result<LlmEvaluationResult> {
        let request = self
            .client
            .post("/chat/completions", &chat_body(Some(&self.model), text, context))
            .bearer_auth(&self.api_key);

        let reply = self.client.send(request).await?;
        parse_verdict(&text_at(&reply, "/choices/0/message/content", self.name())?)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
