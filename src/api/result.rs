//! Evaluation result types.

use crate::classifier::LlmEvaluationResult;
use crate::policy::{Direction, PolicyAction, PolicyDefinition, Severity};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Reason attached to results for empty or whitespace-only content.
pub const NO_CONTENT_REASON: &str = "No content to evaluate";

/// Reason attached to results with no recorded violation.
pub const NO_VIOLATION_REASON: &str = "No policy violations detected";

/// Which layer produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// A policy regular expression
    Pattern,
    /// A policy domain keyword
    Domain,
    /// A rule registered at runtime
    CustomRule,
    /// The classification fallback
    Classifier,
}

/// One policy firing. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyMatch {
    /// ID of the policy or rule that fired
    pub rule_id: String,
    /// Human-readable description of the violation
    pub message: String,
    /// Whether this match blocks the content
    pub blocked: bool,
    /// Action of the originating rule
    pub action: PolicyAction,
    /// Severity of the originating rule
    pub severity: Severity,
    /// Matched substring, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
    /// Byte offset of the matched substring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Category of the originating rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Name of the originating policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    /// Direction of the evaluation
    pub direction: Direction,
    /// Layer that produced the match
    pub source: MatchSource,
    /// When the match was recorded
    pub timestamp: DateTime<Utc>,
}

impl PolicyMatch {
    /// Create a match for a policy definition.
    pub fn for_policy(
        policy: &PolicyDefinition,
        direction: Direction,
        source: MatchSource,
        matched: Option<(usize, &str)>,
    ) -> Self {
        let message = if policy.description.is_empty() {
            format!("Policy '{}' triggered", policy.name)
        } else {
            format!("Policy '{}' triggered: {}", policy.name, policy.description)
        };

        Self {
            rule_id: policy.id.clone(),
            message,
            blocked: policy.action.is_blocking(),
            action: policy.action,
            severity: policy.severity,
            matched_text: matched.map(|(_, text)| text.to_string()),
            position: matched.map(|(pos, _)| pos),
            category: policy.category.clone(),
            policy_name: Some(policy.name.clone()),
            direction,
            source,
            timestamp: Utc::now(),
        }
    }

    /// Create a match that is not tied to a policy definition.
    pub fn new(
        rule_id: impl Into<String>,
        message: impl Into<String>,
        action: PolicyAction,
        severity: Severity,
        direction: Direction,
        source: MatchSource,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            message: message.into(),
            blocked: action.is_blocking(),
            action,
            severity,
            matched_text: None,
            position: None,
            category: None,
            policy_name: None,
            direction,
            source,
            timestamp: Utc::now(),
        }
    }

    /// Set the matched substring and its byte offset.
    pub fn with_matched(mut self, position: usize, text: impl Into<String>) -> Self {
        self.position = Some(position);
        self.matched_text = Some(text.into());
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Which policies were considered and which fired, for compliance reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyUsageInfo {
    /// Every policy considered for this direction
    pub evaluated_policies: Vec<String>,
    /// The subset that matched
    pub triggered_policies: Vec<String>,
    /// Number of policies considered
    pub evaluation_count: usize,
    /// Direction of the evaluation
    pub direction: Direction,
}

impl PolicyUsageInfo {
    /// Usage info with nothing evaluated.
    pub fn empty(direction: Direction) -> Self {
        Self {
            evaluated_policies: Vec::new(),
            triggered_policies: Vec::new(),
            evaluation_count: 0,
            direction,
        }
    }
}

/// The verdict for one evaluation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailResult {
    /// Unique ID of this evaluation
    pub evaluation_id: Uuid,
    /// Whether the content may proceed
    pub allowed: bool,
    /// Whether the content is blocked; always `!allowed`
    pub blocked: bool,
    /// Matches in the order they were recorded
    pub matches: Vec<PolicyMatch>,
    /// Rewritten content, set only by transform-capable rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_input: Option<String>,
    /// Behavioral guidelines for the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidelines: Option<Vec<String>>,
    /// Explanation of the verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Wall-clock evaluation time in milliseconds
    pub evaluation_duration_ms: f64,
    /// IDs of policies and rules that matched, de-duplicated
    pub triggered_policies: Vec<String>,
    /// Usage bookkeeping
    pub policy_usage: PolicyUsageInfo,
    /// Direction of the evaluation
    pub direction: Direction,
    /// Raw classifier verdict, when the fallback ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_evaluation: Option<LlmEvaluationResult>,
}

impl GuardrailResult {
    /// Create an allowed result.
    pub fn allow(direction: Direction) -> Self {
        Self {
            evaluation_id: Uuid::new_v4(),
            allowed: true,
            blocked: false,
            matches: Vec::new(),
            transformed_input: None,
            guidelines: None,
            reason: None,
            evaluation_duration_ms: 0.0,
            triggered_policies: Vec::new(),
            policy_usage: PolicyUsageInfo::empty(direction),
            direction,
            llm_evaluation: None,
        }
    }

    /// Create a blocked result.
    pub fn block(direction: Direction, reason: impl Into<String>) -> Self {
        Self::allow(direction).with_blocked(true).with_reason(reason)
    }

    /// The result for empty or whitespace-only content.
    pub fn no_content(direction: Direction) -> Self {
        Self::allow(direction).with_reason(NO_CONTENT_REASON)
    }

    /// Set the verdict, keeping `allowed` and `blocked` consistent.
    pub fn with_blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
        self.allowed = !blocked;
        self
    }

    /// Set the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the evaluation time.
    pub fn with_evaluation_time(mut self, duration: Duration) -> Self {
        self.evaluation_duration_ms = duration.as_secs_f64() * 1000.0;
        self
    }

    /// Whether any match was recorded.
    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Matches that block the content.
    pub fn blocking_matches(&self) -> impl Iterator<Item = &PolicyMatch> {
        self.matches.iter().filter(|m| m.blocked)
    }

    /// Highest severity among the matches.
    pub fn max_severity(&self) -> Option<Severity> {
        self.matches.iter().map(|m| m.severity).max()
    }
}
