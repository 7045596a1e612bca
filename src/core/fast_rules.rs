//! Fast rule evaluator: local pattern and keyword checks, no I/O.

use crate::api::{MatchSource, PolicyMatch, NO_CONTENT_REASON};
use crate::policy::{CompiledPolicy, Direction, PolicyAction, PolicyDirection, Severity};
use crate::{Error, Result};

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Reason attached to outcomes for non-string input.
pub const NON_TEXT_REASON: &str = "Non-text content is not evaluated";

/// A rule registered programmatically at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDefinition {
    /// Unique rule ID
    pub id: String,
    /// Regular expression; `/body/flags` literals are accepted (flags `i`, `m`, `s`)
    pub pattern: String,
    /// Action taken when matched
    pub action: PolicyAction,
    /// Message recorded on the match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Advisory severity
    #[serde(default)]
    pub severity: Severity,
    /// Optional category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Directions the rule participates in
    #[serde(default)]
    pub direction: PolicyDirection,
    /// When set, matches are rewritten to this text in the transformed output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Compile the pattern case-insensitively
    #[serde(default)]
    pub case_insensitive: bool,
}

impl RuleDefinition {
    /// Create a rule applying in both directions.
    pub fn new(id: impl Into<String>, pattern: impl Into<String>, action: PolicyAction) -> Self {
        Self {
            id: id.into(),
            pattern: pattern.into(),
            action,
            message: None,
            severity: Severity::Medium,
            category: None,
            direction: PolicyDirection::Both,
            replacement: None,
            case_insensitive: false,
        }
    }

    /// Set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the direction.
    pub fn with_direction(mut self, direction: PolicyDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Make the rule transform-capable.
    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = Some(replacement.into());
        self
    }

    /// Compile case-insensitively.
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    fn compile(&self) -> Result<Regex> {
        if self.id.trim().is_empty() {
            return Err(Error::invalid_rule(&self.id, "rule ID cannot be empty"));
        }

        let (body, flags) = split_regex_literal(&self.pattern);
        if body.is_empty() {
            return Err(Error::invalid_rule(&self.id, "pattern cannot be empty"));
        }

        RegexBuilder::new(body)
            .case_insensitive(self.case_insensitive || flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .build()
            .map_err(|e| Error::invalid_rule(&self.id, e.to_string()))
    }
}

/// Split a `/body/flags` literal. Anything else is returned unchanged with no flags.
fn split_regex_literal(pattern: &str) -> (&str, &str) {
    if let Some(rest) = pattern.strip_prefix('/') {
        if let Some(end) = rest.rfind('/') {
            let flags = &rest[end + 1..];
            if flags.chars().all(|c| "gimsuy".contains(c)) {
                return (&rest[..end], flags);
            }
        }
    }
    (pattern, "")
}

#[derive(Debug)]
struct CustomRule {
    definition: RuleDefinition,
    regex: Regex,
}

/// Result of a fast rule evaluation.
#[derive(Debug, Clone, Default)]
pub struct FastRuleOutcome {
    /// Matches in policy declaration order, then custom rule registration order
    pub matches: Vec<PolicyMatch>,
    /// True iff at least one match has a blocking action
    pub blocked: bool,
    /// IDs of policies and rules that matched
    pub matched_policy_ids: Vec<String>,
    /// IDs of policies and rules considered for this direction
    pub evaluated_policies: Vec<String>,
    /// Content rewritten by transform-capable rules
    pub transformed: Option<String>,
    /// Reason for short-circuited evaluations
    pub reason: Option<String>,
}

impl FastRuleOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

/// Evaluates compiled policies and runtime rules against text.
///
/// Evaluation only reads shared state and is safe to call concurrently.
pub struct FastRules {
    policies: RwLock<Arc<Vec<CompiledPolicy>>>,
    custom_rules: RwLock<Vec<Arc<CustomRule>>>,
}

impl FastRules {
    /// Create an evaluator over a compiled policy set.
    pub fn new(policies: Vec<CompiledPolicy>) -> Self {
        Self {
            policies: RwLock::new(Arc::new(policies)),
            custom_rules: RwLock::new(Vec::new()),
        }
    }

    /// Replace the compiled policy set. Runtime rules are kept.
    pub fn replace_policies(&self, policies: Vec<CompiledPolicy>) {
        *self.policies.write() = Arc::new(policies);
    }

    /// Snapshot of the compiled policy set.
    pub fn policies(&self) -> Arc<Vec<CompiledPolicy>> {
        Arc::clone(&self.policies.read())
    }

    /// Register a rule. Invalid patterns are rejected immediately; a rule
    /// with an existing ID replaces the earlier one.
    pub fn add_rule(&self, definition: RuleDefinition) -> Result<()> {
        let regex = definition.compile()?;
        let rule = Arc::new(CustomRule { definition, regex });

        let mut rules = self.custom_rules.write();
        match rules
            .iter_mut()
            .find(|r| r.definition.id == rule.definition.id)
        {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }

        info!(rules = rules.len(), "Registered custom rule");
        Ok(())
    }

    /// Remove a rule by ID. Returns whether a rule was removed.
    pub fn remove_rule(&self, id: &str) -> bool {
        let mut rules = self.custom_rules.write();
        let before = rules.len();
        rules.retain(|r| r.definition.id != id);
        rules.len() != before
    }

    /// Definitions of the registered rules, in registration order.
    pub fn rules(&self) -> Vec<RuleDefinition> {
        self.custom_rules
            .read()
            .iter()
            .map(|r| r.definition.clone())
            .collect()
    }

    /// Number of registered rules.
    pub fn rule_count(&self) -> usize {
        self.custom_rules.read().len()
    }

    /// Evaluate `text` for `direction`.
    pub fn evaluate(&self, text: &str, direction: Direction) -> FastRuleOutcome {
        self.evaluate_with(&self.policies(), text, direction)
    }

    /// Evaluate `text` against `policies` instead of the held set. Runtime
    /// rules still apply.
    pub fn evaluate_with(
        &self,
        policies: &[CompiledPolicy],
        text: &str,
        direction: Direction,
    ) -> FastRuleOutcome {
        if text.trim().is_empty() {
            return FastRuleOutcome::skipped(NO_CONTENT_REASON);
        }

        let rules: Vec<Arc<CustomRule>> = self.custom_rules.read().clone();
        let mut outcome = FastRuleOutcome::default();

        for policy in policies.iter().filter(|p| p.applies_to(direction)) {
            outcome.evaluated_policies.push(policy.definition.id.clone());
            if let Some(found) = match_policy(policy, text, direction) {
                outcome.matched_policy_ids.push(found.rule_id.clone());
                outcome.matches.push(found);
            }
        }

        let mut transformed: Option<String> = None;
        for rule in rules.iter().filter(|r| r.definition.direction.applies_to(direction)) {
            let definition = &rule.definition;
            outcome.evaluated_policies.push(definition.id.clone());

            let Some(m) = rule.regex.find(text) else {
                continue;
            };

            let message = definition
                .message
                .clone()
                .unwrap_or_else(|| format!("Custom rule '{}' matched", definition.id));
            let mut found = PolicyMatch::new(
                &definition.id,
                message,
                definition.action,
                definition.severity,
                direction,
                MatchSource::CustomRule,
            )
            .with_matched(m.start(), m.as_str());
            if let Some(category) = &definition.category {
                found = found.with_category(category);
            }

            if let Some(replacement) = &definition.replacement {
                let current = transformed.as_deref().unwrap_or(text);
                transformed = Some(
                    rule.regex
                        .replace_all(current, regex::NoExpand(replacement.as_str()))
                        .into_owned(),
                );
            }

            outcome.matched_policy_ids.push(found.rule_id.clone());
            outcome.matches.push(found);
        }

        outcome.blocked = outcome.matches.iter().any(|m| m.blocked);
        outcome.transformed = transformed;

        debug!(
            direction = %direction,
            evaluated = outcome.evaluated_policies.len(),
            matched = outcome.matches.len(),
            blocked = outcome.blocked,
            "Fast rules evaluated"
        );
        outcome
    }

    /// Evaluate host-supplied JSON. Strings are evaluated; anything else
    /// yields an allowed outcome.
    pub fn evaluate_value(&self, value: &serde_json::Value, direction: Direction) -> FastRuleOutcome {
        match value {
            serde_json::Value::String(text) => self.evaluate(text, direction),
            _ => FastRuleOutcome::skipped(NON_TEXT_REASON),
        }
    }
}

impl Default for FastRules {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// First pattern hit, otherwise first domain keyword hit.
fn match_policy(policy: &CompiledPolicy, text: &str, direction: Direction) -> Option<PolicyMatch> {
    let definition = &policy.definition;

    if let Some(m) = policy.patterns.iter().find_map(|p| p.find(text)) {
        return Some(PolicyMatch::for_policy(
            definition,
            direction,
            MatchSource::Pattern,
            Some((m.start(), m.as_str())),
        ));
    }

    policy.domains.iter().find_map(|d| d.find(text)).map(|m| {
        PolicyMatch::for_policy(
            definition,
            direction,
            MatchSource::Domain,
            Some((m.start(), m.as_str())),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyCompiler, PolicyDefinition};

    fn rules_for(policies: Vec<PolicyDefinition>) -> FastRules {
        FastRules::new(PolicyCompiler::default().compile(&policies))
    }

    fn pii_policy() -> PolicyDefinition {
        PolicyDefinition::builder("pii-email")
            .name("Email")
            .description("No email addresses")
            .direction(PolicyDirection::Outbound)
            .action(PolicyAction::Block)
            .severity(Severity::High)
            .pattern(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .build()
    }

    #[test]
    fn test_email_blocked_outbound() {
        let rules = rules_for(vec![pii_policy()]);
        let outcome = rules.evaluate("My email is john.doe@example.com", Direction::Outbound);

        assert!(outcome.blocked);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].rule_id, "pii-email");
        assert_eq!(outcome.matches[0].matched_text.as_deref(), Some("john.doe@example.com"));
        assert_eq!(outcome.matches[0].position, Some(12));
        assert_eq!(outcome.matched_policy_ids, vec!["pii-email"]);
        assert!(outcome.transformed.is_none());
    }

    #[test]
    fn test_outbound_policy_ignored_inbound() {
        let rules = rules_for(vec![pii_policy()]);
        let outcome = rules.evaluate("My email is john.doe@example.com", Direction::Inbound);

        assert!(!outcome.blocked);
        assert!(outcome.matches.is_empty());
        assert!(outcome.evaluated_policies.is_empty());
    }

    #[test]
    fn test_both_direction_applies_everywhere() {
        let policy = PolicyDefinition::builder("kw")
            .direction(PolicyDirection::Both)
            .domain("diagnosis")
            .build();
        let rules = rules_for(vec![policy]);

        for direction in [Direction::Inbound, Direction::Outbound] {
            let outcome = rules.evaluate("I need a Diagnosis please", direction);
            assert_eq!(outcome.matches.len(), 1);
            assert_eq!(outcome.matches[0].source, MatchSource::Domain);
            assert!(!outcome.blocked);
        }
    }

    #[test]
    fn test_warn_and_allow_never_block() {
        let warn = PolicyDefinition::builder("warn").action(PolicyAction::Warn).pattern("alpha").build();
        let allow = PolicyDefinition::builder("allow").action(PolicyAction::Allow).pattern("beta").build();
        let rules = rules_for(vec![warn, allow]);

        let outcome = rules.evaluate("alpha and beta", Direction::Inbound);
        assert_eq!(outcome.matches.len(), 2);
        assert!(!outcome.blocked);
    }

    #[test]
    fn test_empty_input_short_circuits() {
        let rules = rules_for(vec![pii_policy()]);
        for text in ["", "   ", "\n\t"] {
            let outcome = rules.evaluate(text, Direction::Outbound);
            assert!(!outcome.blocked);
            assert!(outcome.matches.is_empty());
            assert!(outcome.evaluated_policies.is_empty());
            assert_eq!(outcome.reason.as_deref(), Some(NO_CONTENT_REASON));
        }
    }

    #[test]
    fn test_non_text_value_is_allowed() {
        let rules = rules_for(vec![pii_policy()]);
        let outcome = rules.evaluate_value(&serde_json::json!({"a": 1}), Direction::Outbound);
        assert!(!outcome.blocked);
        assert_eq!(outcome.reason.as_deref(), Some(NON_TEXT_REASON));

        let outcome = rules.evaluate_value(&serde_json::json!("x@y.io"), Direction::Outbound);
        assert!(outcome.blocked);
    }

    #[test]
    fn test_custom_rule_warns() {
        let rules = FastRules::default();
        rules
            .add_rule(RuleDefinition::new("test-keyword", r"/\btest-keyword\b/gi", PolicyAction::Warn))
            .unwrap();

        let outcome = rules.evaluate("This contains a test-keyword", Direction::Inbound);
        assert_eq!(outcome.matches.len(), 1);
        assert!(!outcome.blocked);
        assert_eq!(outcome.matches[0].source, MatchSource::CustomRule);

        let outcome = rules.evaluate("This contains a TEST-KEYWORD", Direction::Outbound);
        assert_eq!(outcome.matches.len(), 1);
    }

    #[test]
    fn test_invalid_custom_rule_raises() {
        let rules = FastRules::default();
        let err = rules
            .add_rule(RuleDefinition::new("bad", "(unclosed", PolicyAction::Block))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRule { ref rule_id, .. } if rule_id == "bad"));
        assert_eq!(rules.rule_count(), 0);
    }

    #[test]
    fn test_custom_rule_replacement_is_opt_in() {
        let rules = FastRules::default();
        rules
            .add_rule(
                RuleDefinition::new("phone", r"\d{3}-\d{4}", PolicyAction::Warn)
                    .with_replacement("[PHONE]"),
            )
            .unwrap();
        rules
            .add_rule(RuleDefinition::new("secret", "hunter2", PolicyAction::Block))
            .unwrap();

        let outcome = rules.evaluate("call 555-1234, password hunter2", Direction::Inbound);
        assert!(outcome.blocked);
        assert_eq!(
            outcome.transformed.as_deref(),
            Some("call [PHONE], password hunter2")
        );
    }

    #[test]
    fn test_replacement_is_literal() {
        let rules = FastRules::default();
        rules
            .add_rule(
                RuleDefinition::new("amount", r"\d+ dollars", PolicyAction::Warn)
                    .with_replacement("$AMOUNT"),
            )
            .unwrap();

        let outcome = rules.evaluate("costs 40 dollars", Direction::Inbound);
        assert_eq!(outcome.transformed.as_deref(), Some("costs $AMOUNT"));
    }

    #[test]
    fn test_add_rule_replaces_same_id() {
        let rules = FastRules::default();
        rules.add_rule(RuleDefinition::new("r", "one", PolicyAction::Warn)).unwrap();
        rules.add_rule(RuleDefinition::new("r", "two", PolicyAction::Block)).unwrap();

        assert_eq!(rules.rule_count(), 1);
        assert!(rules.evaluate("two", Direction::Inbound).blocked);
        assert!(rules.evaluate("one", Direction::Inbound).matches.is_empty());

        assert!(rules.remove_rule("r"));
        assert!(!rules.remove_rule("r"));
    }

    #[test]
    fn test_regex_literal_parsing() {
        assert_eq!(split_regex_literal("/abc/gi"), ("abc", "gi"));
        assert_eq!(split_regex_literal("/a/b/"), ("a/b", ""));
        assert_eq!(split_regex_literal("plain"), ("plain", ""));
        assert_eq!(split_regex_literal("/path/to/file.txt"), ("/path/to/file.txt", ""));
    }

    #[test]
    fn test_broken_policy_pattern_never_matches() {
        let policy = PolicyDefinition::builder("broken")
            .action(PolicyAction::Block)
            .pattern("(((")
            .build();
        let rules = rules_for(vec![policy]);
        let outcome = rules.evaluate("(((", Direction::Inbound);
        assert!(!outcome.blocked);
        assert_eq!(outcome.evaluated_policies, vec!["broken"]);
    }
}
