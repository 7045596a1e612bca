//! Error types for the guardrail engine.
//!
//! Load-time errors (`PolicySource`, `PolicyFormat`, `Config`) abort engine
//! construction. Per-call errors are absorbed into a
//! [`GuardrailResult`](crate::GuardrailResult) by the engine and never reach
//! callers of `evaluate_input` / `evaluate_output`.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the guardrail engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Policy source is unreachable, unreadable or not parsable at all
    #[error("Policy source error ({source_name}): {message}")]
    PolicySource {
        /// Detailed error message
        message: String,
        /// File path, URL or other label of the source
        source_name: String,
    },

    /// Policy document parsed but violates the schema
    #[error("Policy format error: {message}")]
    PolicyFormat {
        /// Detailed error message
        message: String,
        /// Policy ID that caused the error, if applicable
        policy_id: Option<String>,
    },

    /// A pattern or keyword failed to compile
    #[error("Pattern compile error for `{pattern}`: {message}")]
    PatternCompile {
        /// Detailed error message
        message: String,
        /// The raw pattern string
        pattern: String,
    },

    /// A rule registered at runtime is invalid
    #[error("Invalid rule `{rule_id}`: {message}")]
    InvalidRule {
        /// Detailed error message
        message: String,
        /// ID of the rule being registered
        rule_id: String,
    },

    /// The classifier could not be reached or answered with a transport error
    #[error("Classifier transport error ({provider}): {message}")]
    ClassifierTransport {
        /// Name of the classifier backend
        provider: String,
        /// Detailed error message
        message: String,
    },

    /// The classifier answered with something that is not a valid verdict
    #[error("Classifier format error: {message}")]
    ClassifierFormat {
        /// Detailed error message
        message: String,
    },

    /// Timeout error
    #[error("Operation timed out after {duration_ms}ms: {message}")]
    Timeout {
        /// Detailed error message
        message: String,
        /// Duration in milliseconds before timeout
        duration_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Detailed error message
        message: String,
        /// Configuration key that caused the error
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error inside evaluation (unexpected condition)
    #[error("Internal error: {message}")]
    Internal {
        /// Detailed error message
        message: String,
    },
}

impl Error {
    /// Create a policy source error.
    pub fn policy_source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PolicySource {
            message: message.into(),
            source_name: source_name.into(),
        }
    }

    /// Create a policy format error.
    pub fn policy_format(message: impl Into<String>) -> Self {
        Error::PolicyFormat {
            message: message.into(),
            policy_id: None,
        }
    }

    /// Create a policy format error with policy context.
    pub fn policy_format_for(message: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Error::PolicyFormat {
            message: message.into(),
            policy_id: Some(policy_id.into()),
        }
    }

    /// Create a pattern compile error.
    pub fn pattern_compile(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PatternCompile {
            message: message.into(),
            pattern: pattern.into(),
        }
    }

    /// Create an invalid rule error.
    pub fn invalid_rule(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidRule {
            message: message.into(),
            rule_id: rule_id.into(),
        }
    }

    /// Create a classifier transport error.
    pub fn classifier_transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ClassifierTransport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a classifier format error.
    pub fn classifier_format(message: impl Into<String>) -> Self {
        Error::ClassifierFormat {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>, duration_ms: u64) -> Self {
        Error::Timeout {
            message: message.into(),
            duration_ms,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error with key context.
    pub fn config_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (the call may succeed if retried).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ClassifierTransport { .. } | Error::Timeout { .. }
        )
    }

    /// Check if this error must abort engine initialization.
    pub fn is_load_time(&self) -> bool {
        matches!(
            self,
            Error::PolicySource { .. } | Error::PolicyFormat { .. } | Error::Config { .. }
        )
    }

    /// Get the error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::PolicySource { .. } => "policy_source",
            Error::PolicyFormat { .. } => "policy_format",
            Error::PatternCompile { .. } => "pattern_compile",
            Error::InvalidRule { .. } => "invalid_rule",
            Error::ClassifierTransport { .. } => "classifier_transport",
            Error::ClassifierFormat { .. } => "classifier_format",
            Error::Timeout { .. } => "timeout",
            Error::Config { .. } => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Yaml(_) => "yaml",
            Error::Internal { .. } => "internal",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::config(err.to_string())
    }
}
