//! Classification fallback behind a narrow, pluggable interface.
//!
//! The engine only ever talks to [`ClassificationFallback`], which wraps an
//! optional [`LlmService`]. Concrete HTTP backends live in the submodules and
//! can be built from configuration with [`from_config`].

mod anthropic;
mod azure;
mod client;
mod google;
mod openai;
mod prompt;

pub use anthropic::AnthropicClassifier;
pub use azure::AzureOpenAiClassifier;
pub use client::ClassifierHttpClient;
pub use google::GoogleClassifier;
pub use openai::OpenAiClassifier;
pub use prompt::{build_system_prompt, parse_verdict};

use crate::api::PolicyMatch;
use crate::config::{LlmConfig, LlmProvider};
use crate::policy::{Direction, PolicyDefinition, Severity};
use crate::{Error, Result};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reasoning attached to the synthesized result when classification fails.
pub const CONSERVATIVE_REASONING: &str = "Evaluation failed, defaulting to unsafe";

/// Action suggested by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    /// Content may pass
    Allow,
    /// Content should be blocked
    Block,
    /// Content should be rewritten
    Modify,
}

/// One violation reported by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmViolation {
    /// Reported severity
    #[serde(deserialize_with = "lenient_severity")]
    pub severity: Severity,
    /// What was found
    pub description: String,
    /// Category or policy ID the violation belongs to
    #[serde(rename = "type")]
    pub kind: String,
}

fn lenient_severity<'de, D>(deserializer: D) -> std::result::Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// Structured verdict returned by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmEvaluationResult {
    /// Whether the content is safe
    pub safe: bool,
    /// Violations found
    #[serde(default)]
    pub violations: Vec<LlmViolation>,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Free-form explanation
    #[serde(default)]
    pub reasoning: String,
    /// Suggested action
    pub suggested_action: SuggestedAction,
    /// Rewritten content, when the action is `modify`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_content: Option<String>,
}

impl LlmEvaluationResult {
    /// A safe verdict with no violations.
    pub fn safe(confidence: f64) -> Self {
        Self {
            safe: true,
            violations: Vec::new(),
            confidence,
            reasoning: String::new(),
            suggested_action: SuggestedAction::Allow,
            modified_content: None,
        }
    }

    /// The result used whenever classification fails.
    pub fn conservative() -> Self {
        Self {
            safe: false,
            violations: Vec::new(),
            confidence: 0.0,
            reasoning: CONSERVATIVE_REASONING.to_string(),
            suggested_action: SuggestedAction::Block,
            modified_content: None,
        }
    }

    /// Whether this is the synthesized failure result.
    pub fn is_degraded(&self) -> bool {
        !self.safe && self.confidence == 0.0 && self.reasoning == CONSERVATIVE_REASONING
    }

    /// Whether the verdict asks for the content to be blocked.
    pub fn requests_block(&self) -> bool {
        !self.safe && self.suggested_action == SuggestedAction::Block
    }
}

/// Context handed to a classifier together with the text.
#[derive(Debug, Clone)]
pub struct ClassificationContext {
    /// Direction of the evaluation
    pub direction: Direction,
    /// Fully rendered system prompt
    pub system_prompt: String,
    /// Matches already produced by the fast rules
    pub fast_rule_matches: Vec<PolicyMatch>,
}

/// A classifier backend.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Classify `text`. Errors are turned into the conservative verdict by the caller.
    async fn evaluate(&self, text: &str, context: &ClassificationContext)
        -> Result<LlmEvaluationResult>;

    /// Backend name used in logs.
    fn name(&self) -> &str;
}

/// Wraps an optional classifier with prompt construction, a deadline and
/// conservative failure handling.
pub struct ClassificationFallback {
    service: Option<Arc<dyn LlmService>>,
    enabled: bool,
    policies: RwLock<Arc<Vec<Arc<PolicyDefinition>>>>,
}

impl ClassificationFallback {
    /// Create a fallback.
    pub fn new(
        service: Option<Arc<dyn LlmService>>,
        enabled: bool,
        policies: Vec<Arc<PolicyDefinition>>,
    ) -> Self {
        Self {
            service,
            enabled,
            policies: RwLock::new(Arc::new(policies)),
        }
    }

    /// A fallback that never calls out.
    pub fn disabled() -> Self {
        Self::new(None, false, Vec::new())
    }

    /// Whether a call would reach a classifier.
    pub fn is_active(&self) -> bool {
        self.enabled && self.service.is_some()
    }

    /// Name of the wired classifier.
    pub fn service_name(&self) -> Option<&str> {
        self.service.as_deref().map(|s| s.name())
    }

    /// Replace the policy set used for prompt scoping.
    pub fn replace_policies(&self, policies: Vec<Arc<PolicyDefinition>>) {
        *self.policies.write() = Arc::new(policies);
    }

    /// Classify `content`. Returns `None` without any call when inactive.
    /// Transport failures, timeouts and malformed verdicts all yield
    /// [`LlmEvaluationResult::conservative`].
    pub async fn evaluate_with_llm(
        &self,
        content: &str,
        fast_matches: &[PolicyMatch],
        direction: Direction,
        timeout: Duration,
    ) -> Option<LlmEvaluationResult> {
        let policies = Arc::clone(&self.policies.read());
        self.evaluate_scoped(content, fast_matches, direction, timeout, &policies)
            .await
    }

    /// Like [`evaluate_with_llm`](Self::evaluate_with_llm), scoping the
    /// prompt to `policies` instead of the held set.
    pub async fn evaluate_scoped(
        &self,
        content: &str,
        fast_matches: &[PolicyMatch],
        direction: Direction,
        timeout: Duration,
        policies: &[Arc<PolicyDefinition>],
    ) -> Option<LlmEvaluationResult> {
        if !self.enabled {
            return None;
        }
        let service = self.service.as_ref()?;

        let context = ClassificationContext {
            direction,
            system_prompt: build_system_prompt(direction, fast_matches, policies),
            fast_rule_matches: fast_matches.to_vec(),
        };

        let outcome = match tokio::time::timeout(timeout, service.evaluate(content, &context)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                format!("classifier {} did not answer", service.name()),
                timeout.as_millis() as u64,
            )),
        };

        match outcome.and_then(validate_verdict) {
            Ok(verdict) => {
                debug!(
                    classifier = service.name(),
                    safe = verdict.safe,
                    violations = verdict.violations.len(),
                    confidence = verdict.confidence,
                    "Classifier verdict"
                );
                Some(verdict)
            }
            Err(e) => {
                warn!(classifier = service.name(), error = %e, "Classification failed, defaulting to unsafe");
                Some(LlmEvaluationResult::conservative())
            }
        }
    }
}

fn validate_verdict(verdict: LlmEvaluationResult) -> Result<LlmEvaluationResult> {
    if !verdict.confidence.is_finite() || !(0.0..=1.0).contains(&verdict.confidence) {
        return Err(Error::classifier_format(format!(
            "confidence {} is outside [0, 1]",
            verdict.confidence
        )));
    }
    Ok(verdict)
}

/// Build the backend named by `config.provider`, if any.
pub fn from_config(config: &LlmConfig) -> Result<Option<Arc<dyn LlmService>>> {
    let Some(provider) = config.provider else {
        return Ok(None);
    };

    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| Error::config_key("classifier API key is required", "llm.api_key"))?;
    let timeout = config.timeout();

    let service: Arc<dyn LlmService> = match provider {
        LlmProvider::OpenAi => {
            let mut backend = OpenAiClassifier::new(api_key, timeout)?;
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            if let Some(endpoint) = &config.endpoint {
                backend = backend.with_endpoint(endpoint, timeout)?;
            }
            Arc::new(backend)
        }
        LlmProvider::Anthropic => {
            let mut backend = AnthropicClassifier::new(api_key, timeout)?;
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            if let Some(endpoint) = &config.endpoint {
                backend = backend.with_endpoint(endpoint, timeout)?;
            }
            Arc::new(backend)
        }
        LlmProvider::Google => {
            let mut backend = GoogleClassifier::new(api_key, timeout)?;
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            if let Some(endpoint) = &config.endpoint {
                backend = backend.with_endpoint(endpoint, timeout)?;
            }
            Arc::new(backend)
        }
        LlmProvider::Azure => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| Error::config_key("Azure endpoint is required", "llm.endpoint"))?;
            let deployment = config
                .model
                .as_deref()
                .ok_or_else(|| Error::config_key("Azure deployment is required", "llm.model"))?;
            let mut backend = AzureOpenAiClassifier::new(endpoint, deployment, api_key, timeout)?;
            if let Some(version) = &config.api_version {
                backend = backend.with_api_version(version);
            }
            Arc::new(backend)
        }
    };

    Ok(Some(service))
}
