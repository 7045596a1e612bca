//! Per-call evaluation options.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Options for a single `evaluate_*` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationOptions {
    /// Attach guidelines even when nothing matched
    #[serde(default)]
    pub request_guidelines: bool,
    /// Do not consult the classifier for this call
    #[serde(default)]
    pub skip_fallback: bool,
    /// Deadline for the classifier call; the configured timeout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_timeout_ms: Option<u64>,
    /// Caller's user ID, recorded in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Caller's session ID, recorded in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EvaluationOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach guidelines even with zero matches.
    pub fn with_guidelines(mut self) -> Self {
        self.request_guidelines = true;
        self
    }

    /// Skip the classifier.
    pub fn without_fallback(mut self) -> Self {
        self.skip_fallback = true;
        self
    }

    /// Set the classifier deadline.
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the user ID.
    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    /// Set the session ID.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The classifier deadline, if set.
    pub fn llm_timeout(&self) -> Option<Duration> {
        self.llm_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let options = EvaluationOptions::new()
            .with_guidelines()
            .without_fallback()
            .with_llm_timeout(Duration::from_millis(250))
            .with_user_id("user-123")
            .with_metadata("tenant", serde_json::json!("acme"));

        assert!(options.request_guidelines);
        assert!(options.skip_fallback);
        assert_eq!(options.llm_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(options.user_id.as_deref(), Some("user-123"));
        assert_eq!(options.metadata.len(), 1);
    }

    #[test]
    fn test_deserialize_partial() {
        let options: EvaluationOptions = serde_json::from_str(r#"{"skip_fallback": true}"#).unwrap();
        assert!(options.skip_fallback);
        assert!(!options.request_guidelines);
        assert_eq!(options.llm_timeout(), None);
    }
}
