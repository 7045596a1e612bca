//! Shared HTTP client for classifier backends.

use crate::{Error, Result};

use serde::Serialize;
use std::time::Duration;

/// Maximum number of response body characters kept in error messages.
const ERROR_BODY_LIMIT: usize = 256;

/// Base client for classifier backends.
#[derive(Debug, Clone)]
pub struct ClassifierHttpClient {
    provider: &'static str,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl ClassifierHttpClient {
    /// Create a new client for `provider` rooted at `base_url`.
    pub fn new(provider: &'static str, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("llm-guardrails/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                Error::classifier_transport(provider, format!("cannot build HTTP client: {}", e))
            })?;

        Ok(Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start a POST request to `path` with a JSON body.
    pub fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
    }

    /// Send a request and decode the JSON reply.
    pub async fn send(&self, request: reqwest::RequestBuilder) -> Result<serde_json::Value> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("{} request timed out", self.provider),
                    self.timeout.as_millis() as u64,
                )
            } else {
                Error::classifier_transport(self.provider, format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(Error::classifier_transport(
                self.provider,
                format!("HTTP error: {} {}", status, snippet),
            ));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::classifier_format(format!("{} reply is not JSON: {}", self.provider, e)))
    }
}

/// Text of a JSON string at `pointer`, or a format error naming `provider`.
pub(crate) fn text_at(value: &serde_json::Value, pointer: &str, provider: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::classifier_format(format!("{} reply has no text at {}", provider, pointer))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client =
            ClassifierHttpClient::new("test", "https://api.example.com/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
        assert_eq!(client.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_text_at() {
        let value = serde_json::json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(text_at(&value, "/choices/0/message/content", "t").unwrap(), "hello");
        assert!(text_at(&value, "/choices/1/message/content", "t").is_err());
    }

    #[tokio::test]
    async fn test_connection_error_is_transport() {
        let client =
            ClassifierHttpClient::new("test", "http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = client
            .send(client.post("/x", &serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
