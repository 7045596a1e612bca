//! Azure-hosted OpenAI deployment backend.

use super::client::{text_at, ClassifierHttpClient};
use super::openai::chat_body;
use super::{parse_verdict, ClassificationContext, LlmEvaluationResult, LlmService};
use crate::Result;

use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_API_VERSION: &str = "2024-02-01";

/// Classifier backed by an Azure OpenAI deployment.
pub struct AzureOpenAiClassifier {
    client: ClassifierHttpClient,
    deployment: String,
    api_key: String,
    api_version: String,
}

impl AzureOpenAiClassifier {
    /// Create a classifier for `deployment` on the resource at `endpoint`.
    pub fn new(
        endpoint: &str,
        deployment: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: ClassifierHttpClient::new("azure", endpoint, timeout)?,
            deployment: deployment.into(),
            api_key: api_key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        })
    }

    /// Use a different API version.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }
}

#[async_trait]
impl LlmService for AzureOpenAiClassifier {
    async fn evaluate(&self, text: &str, context: &ClassificationContext) -> Result<LlmEvaluationResult> {
        let path = format!("/openai/deployments/{}/chat/completions", self.deployment);
        let request = self
            .client
            .post(&path, &chat_body(None, text, context))
            .header("api-key", &self.api_key)
            .query(&[("api-version", self.api_version.as_str())]);

        let reply = self.client.send(request).await?;
        parse_verdict(&text_at(&reply, "/choices/0/message/content", self.name())?)
    }

    fn name(&self) -> &str {
        "azure"
    }
}
