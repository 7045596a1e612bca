//! Engine configuration.
//!
//! The configuration is owned by the host application; the engine only
//! consumes it. It can be built in code, read from the environment
//! (`GUARDRAILS_*`, with `__` separating nested keys) or layered from a file.

use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "GUARDRAILS";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Run the local pattern/keyword layer
    pub fast_rules_enabled: bool,
    /// Attach behavioral guidelines to results
    pub augmentation_enabled: bool,
    /// Consult the classification fallback when fast rules do not block
    pub llm_fallback_enabled: bool,
    /// How internal evaluation errors are resolved
    pub failure_mode: FailureMode,
    /// Where policies are loaded from
    pub policy: PolicySourceConfig,
    /// Incremental stream checking
    pub streaming: StreamingConfig,
    /// Compiled matcher cache
    pub cache: CacheConfig,
    /// Classifier backend settings
    pub llm: LlmConfig,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            fast_rules_enabled: true,
            augmentation_enabled: true,
            llm_fallback_enabled: false,
            failure_mode: FailureMode::Open,
            policy: PolicySourceConfig::default(),
            streaming: StreamingConfig::default(),
            cache: CacheConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl GuardrailConfig {
    /// Load configuration from `GUARDRAILS_*` environment variables on top of defaults.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(environment())
            .build()?;
        let config: Self = settings.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a file, with environment variables taking precedence.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(environment())
            .build()?;
        let config: Self = settings.try_deserialize()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.streaming.check_interval == 0 {
            return Err(Error::config_key(
                "check interval must be at least 1",
                "streaming.check_interval",
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(Error::config_key(
                "matcher cache needs room for at least one entry",
                "cache.max_entries",
            ));
        }

        if self.llm.timeout_ms == 0 {
            return Err(Error::config_key("LLM timeout must be positive", "llm.timeout_ms"));
        }

        if self.policy.api_key.is_some() && self.policy.api_endpoint.is_none() {
            return Err(Error::config_key(
                "policy API key given without an API endpoint",
                "policy.api_key",
            ));
        }

        Ok(())
    }

    /// Set the failure mode.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Enable or disable the classification fallback.
    pub fn with_llm_fallback(mut self, enabled: bool) -> Self {
        self.llm_fallback_enabled = enabled;
        self
    }

    /// Enable or disable guideline augmentation.
    pub fn with_augmentation(mut self, enabled: bool) -> Self {
        self.augmentation_enabled = enabled;
        self
    }

    /// Enable or disable the fast rule layer.
    pub fn with_fast_rules(mut self, enabled: bool) -> Self {
        self.fast_rules_enabled = enabled;
        self
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Engine-wide resolution of internal evaluation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Allow content when evaluation fails
    #[default]
    Open,
    /// Block content when evaluation fails
    Closed,
}

impl FailureMode {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::Open => "open",
            FailureMode::Closed => "closed",
        }
    }
}

/// Policy source settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PolicySourceConfig {
    /// Local YAML/JSON policy file
    pub path: Option<PathBuf>,
    /// Remote policy endpoint returning the same document shape
    pub api_endpoint: Option<String>,
    /// Bearer token for the remote endpoint
    pub api_key: Option<String>,
}

/// What to do when an incremental stream check blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamViolationAction {
    /// Terminate the stream and emit the replacement message
    #[default]
    Interrupt,
    /// Substitute the placeholder for the violating tail and keep streaming
    Replace,
    /// Log the violation and leave the stream unchanged
    Continue,
}

/// Streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Evaluate the accumulated buffer every N chunks
    pub check_interval: usize,
    /// Reaction to a blocking verdict mid-stream
    pub on_stream_violation: StreamViolationAction,
    /// Message emitted when a stream is interrupted
    pub replacement_message: String,
    /// Text substituted for a violating tail in `replace` mode
    pub placeholder: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            check_interval: 5,
            on_stream_violation: StreamViolationAction::Interrupt,
            replacement_message: "[Response interrupted: content policy violation]".to_string(),
            placeholder: "[content removed]".to_string(),
        }
    }
}

/// Compiled matcher cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of compiled matchers kept
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

/// Supported classifier backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI-compatible chat completions
    OpenAi,
    /// Anthropic-compatible messages API
    Anthropic,
    /// Google-compatible generateContent API
    Google,
    /// Azure-hosted OpenAI deployments
    Azure,
}

/// Classifier backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend to build when no service is injected
    pub provider: Option<LlmProvider>,
    /// Model (or Azure deployment) name
    pub model: Option<String>,
    /// API key for the backend
    pub api_key: Option<String>,
    /// Override for the backend base URL
    pub endpoint: Option<String>,
    /// API version (Azure)
    pub api_version: Option<String>,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            api_key: None,
            endpoint: None,
            api_version: None,
            timeout_ms: 10_000,
        }
    }
}

impl LlmConfig {
    /// Get the timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GuardrailConfig::default();
        assert!(config.fast_rules_enabled);
        assert!(config.augmentation_enabled);
        assert!(!config.llm_fallback_enabled);
        assert_eq!(config.failure_mode, FailureMode::Open);
        assert_eq!(config.streaming.check_interval, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = GuardrailConfig::default();
        config.streaming.check_interval = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "streaming.check_interval"));
    }

    #[test]
    fn test_validate_rejects_orphan_api_key() {
        let mut config = GuardrailConfig::default();
        config.policy.api_key = Some("secret".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "failure_mode: closed\nllm_fallback_enabled: true\nstreaming:\n  check_interval: 3\n  on_stream_violation: replace\nllm:\n  provider: anthropic\n  timeout_ms: 2500"
        )
        .unwrap();

        let config = GuardrailConfig::from_file(file.path()).unwrap();
        assert_eq!(config.failure_mode, FailureMode::Closed);
        assert!(config.llm_fallback_enabled);
        assert_eq!(config.streaming.check_interval, 3);
        assert_eq!(config.streaming.on_stream_violation, StreamViolationAction::Replace);
        assert_eq!(config.llm.provider, Some(LlmProvider::Anthropic));
        assert_eq!(config.llm.timeout(), Duration::from_millis(2500));
        // untouched fields keep their defaults
        assert!(config.fast_rules_enabled);
    }

    #[test]
    fn test_from_missing_file() {
        let err = GuardrailConfig::from_file("/nonexistent/guardrails.yaml").unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
