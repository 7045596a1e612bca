//! Policy document parsing and validation.

use super::PolicyDefinition;
use crate::{Error, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A policy document: a version tag plus a list of policy definitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyFile {
    /// Version of the policy set
    pub version: String,
    /// When the policy set was last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Policies defined in this document
    #[serde(default)]
    pub policies: Vec<PolicyDefinition>,
}

/// Serialization format of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
    /// YAML
    Yaml,
    /// JSON
    Json,
    /// Unknown; YAML is tried first, then JSON
    Auto,
}

impl PolicyFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Self {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension.to_lowercase().as_str() {
            "yaml" | "yml" => PolicyFormat::Yaml,
            "json" => PolicyFormat::Json,
            _ => PolicyFormat::Auto,
        }
    }

    /// Guess the format from an HTTP content type.
    pub fn from_content_type(content_type: &str) -> Self {
        let content_type = content_type.to_lowercase();
        if content_type.contains("json") {
            PolicyFormat::Json
        } else if content_type.contains("yaml") {
            PolicyFormat::Yaml
        } else {
            PolicyFormat::Auto
        }
    }
}

impl PolicyFile {
    /// Create a policy document with the given policies.
    pub fn new(version: impl Into<String>, policies: Vec<PolicyDefinition>) -> Self {
        Self {
            version: version.into(),
            updated_at: None,
            policies,
        }
    }

    /// Parse and validate a document.
    ///
    /// Content that is neither valid YAML nor JSON is a
    /// [`Error::PolicySource`]; content that parses but does not fit the
    /// schema is a [`Error::PolicyFormat`].
    pub fn parse(content: &str, format: PolicyFormat, source_name: &str) -> Result<Self> {
        let raw = parse_raw(content, format).map_err(|e| {
            Error::policy_source(source_name, format!("unparsable policy document: {}", e))
        })?;

        let document: PolicyFile = serde_json::from_value(raw).map_err(|e| {
            Error::policy_format(format!("{} does not match the policy schema: {}", source_name, e))
        })?;

        document.validate()?;
        Ok(document)
    }

    /// Parse a policy document from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::parse(yaml, PolicyFormat::Yaml, "<yaml>")
    }

    /// Parse a policy document from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::parse(json, PolicyFormat::Json, "<json>")
    }

    /// Load a policy document from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::policy_source(&name, format!("cannot read file: {}", e)))?;

        Self::parse(&content, PolicyFormat::from_path(path), &name)
    }

    /// The policy set bundled with the crate (PII, secrets, prompt injection).
    pub fn builtin() -> Result<Self> {
        Self::parse(
            include_str!("../../policies/default.yaml"),
            PolicyFormat::Yaml,
            "builtin",
        )
    }

    /// Convert the document to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(Error::from)
    }

    /// Convert the document to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::from)
    }

    /// Validate the document: a version, valid policies, unique IDs.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::policy_format("Policy document version cannot be empty"));
        }

        let mut seen = HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if !seen.insert(policy.id.as_str()) {
                return Err(Error::policy_format_for(
                    format!("Duplicate policy ID: {}", policy.id),
                    &policy.id,
                ));
            }
        }

        Ok(())
    }

    /// Find a policy by ID.
    pub fn get_policy(&self, id: &str) -> Option<&PolicyDefinition> {
        self.policies.iter().find(|p| p.id == id)
    }
}

fn parse_raw(content: &str, format: PolicyFormat) -> std::result::Result<serde_json::Value, String> {
    match format {
        PolicyFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        PolicyFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        PolicyFormat::Auto => serde_yaml::from_str(content)
            .or_else(|_| serde_json::from_str(content))
            .map_err(|e: serde_json::Error| e.to_string()),
    }
}
