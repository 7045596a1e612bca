//! Policy definitions, documents, sources and compilation.
//!
//! A [`PolicyDefinition`] is the unit of enforcement. Definitions are read
//! from a [`PolicyFile`] obtained through a [`PolicySource`], then compiled
//! once into [`CompiledPolicy`] values used by the fast rule evaluator.

mod compiler;
mod document;
mod source;

pub use compiler::{CompiledMatcher, CompiledPolicy, MatcherKind, PolicyCompiler};
pub use document::{PolicyFile, PolicyFormat};
pub use source::{default_candidate_paths, PolicyLoader, PolicySource};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an evaluation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Text flowing into the model
    Inbound,
    /// Text flowing out of the model
    Outbound,
}

impl Direction {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directions a policy participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDirection {
    /// Only inbound evaluations
    Inbound,
    /// Only outbound evaluations
    Outbound,
    /// Every evaluation
    #[default]
    Both,
}

impl PolicyDirection {
    /// Whether a policy scoped to `self` takes part in an evaluation in `direction`.
    pub fn applies_to(&self, direction: Direction) -> bool {
        match self {
            PolicyDirection::Both => true,
            PolicyDirection::Inbound => direction == Direction::Inbound,
            PolicyDirection::Outbound => direction == Direction::Outbound,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDirection::Inbound => "inbound",
            PolicyDirection::Outbound => "outbound",
            PolicyDirection::Both => "both",
        }
    }
}

/// What happens when a policy matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// The overall result is blocked
    Block,
    /// Recorded as a violation, not blocked
    Warn,
    /// Informational only, never blocks
    Allow,
}

impl PolicyAction {
    /// Whether a match with this action blocks the content.
    pub fn is_blocking(&self) -> bool {
        matches!(self, PolicyAction::Block)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Block => "block",
            PolicyAction::Warn => "warn",
            PolicyAction::Allow => "allow",
        }
    }
}

/// Advisory severity, ordered `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low
    Low,
    /// Medium
    #[default]
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl Severity {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(crate::Error::policy_format(format!("Unknown severity: {}", s))),
        }
    }
}

/// A policy as declared in a policy document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyDefinition {
    /// Unique, stable identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// What the policy protects against
    pub description: String,
    /// Evaluation directions this policy participates in
    pub direction: PolicyDirection,
    /// Action taken when matched
    pub action: PolicyAction,
    /// Advisory severity
    #[serde(default)]
    pub severity: Severity,
    /// Regular expressions for literal/structural matching
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    /// Keywords for whole-word matching and classifier scoping
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    /// Instructions surfaced when the policy triggers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guidelines: Vec<String>,
    /// Optional category label carried onto matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Whether the policy takes part in evaluation
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PolicyDefinition {
    /// Create a policy builder.
    pub fn builder(id: impl Into<String>) -> PolicyDefinitionBuilder {
        PolicyDefinitionBuilder::new(id)
    }

    /// Whether the policy takes part in an evaluation in `direction`.
    pub fn applies_to(&self, direction: Direction) -> bool {
        self.enabled && self.direction.applies_to(direction)
    }

    /// Check if the policy is valid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.trim().is_empty() {
            return Err(crate::Error::policy_format("Policy ID cannot be empty"));
        }

        if self.name.trim().is_empty() {
            return Err(crate::Error::policy_format_for(
                "Policy name cannot be empty",
                &self.id,
            ));
        }

        if self.patterns.iter().any(|p| p.is_empty()) {
            return Err(crate::Error::policy_format_for(
                "Policy contains an empty pattern",
                &self.id,
            ));
        }

        if self.domains.iter().any(|d| d.trim().is_empty()) {
            return Err(crate::Error::policy_format_for(
                "Policy contains an empty domain keyword",
                &self.id,
            ));
        }

        Ok(())
    }
}

/// Builder for creating policy definitions in code.
#[derive(Debug)]
pub struct PolicyDefinitionBuilder {
    policy: PolicyDefinition,
}

impl PolicyDefinitionBuilder {
    /// Create a new builder; defaults to a `warn` policy in both directions.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            policy: PolicyDefinition {
                name: id.clone(),
                id,
                description: String::new(),
                direction: PolicyDirection::Both,
                action: PolicyAction::Warn,
                severity: Severity::Medium,
                patterns: Vec::new(),
                domains: Vec::new(),
                guidelines: Vec::new(),
                category: None,
                enabled: true,
            },
        }
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.policy.name = name.into();
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.policy.description = description.into();
        self
    }

    /// Set the direction.
    pub fn direction(mut self, direction: PolicyDirection) -> Self {
        self.policy.direction = direction;
        self
    }

    /// Set the action.
    pub fn action(mut self, action: PolicyAction) -> Self {
        self.policy.action = action;
        self
    }

    /// Set the severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.policy.severity = severity;
        self
    }

    /// Add a pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.policy.patterns.push(pattern.into());
        self
    }

    /// Add a domain keyword.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.policy.domains.push(domain.into());
        self
    }

    /// Add a guideline.
    pub fn guideline(mut self, guideline: impl Into<String>) -> Self {
        self.policy.guidelines.push(guideline.into());
        self
    }

    /// Set the category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.policy.category = Some(category.into());
        self
    }

    /// Set whether the policy is enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.policy.enabled = enabled;
        self
    }

    /// Build the policy.
    pub fn build(self) -> PolicyDefinition {
        self.policy
    }
}
