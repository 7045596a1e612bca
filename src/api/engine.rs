//! Guardrail engine implementation.

use super::{EvaluationOptions, GuardrailResult, MatchSource, PolicyMatch, PolicyUsageInfo};
use super::NO_VIOLATION_REASON;
use crate::cache::CacheStats;
use crate::classifier::{self, ClassificationFallback, LlmEvaluationResult, LlmService};
use crate::config::{FailureMode, GuardrailConfig};
use crate::core::{render_augmented, FastRuleOutcome, FastRules, PromptAugmentation, NON_TEXT_REASON};
use crate::policy::{
    CompiledPolicy, Direction, PolicyAction, PolicyCompiler, PolicyDefinition, PolicyFile,
    PolicyLoader, PolicySource, Severity,
};
use crate::telemetry::{Telemetry, TelemetryMetrics};
use crate::{Error, Result};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Rule ID recorded when an unsafe verdict names no violation.
pub const LLM_EVALUATION_RULE: &str = "llm-evaluation";

/// Rule ID recorded when classification failed and the conservative verdict applied.
pub const LLM_EVALUATION_ERROR_RULE: &str = "llm-evaluation-error";

/// A loaded policy and the label of the source it came from.
#[derive(Debug, Clone)]
struct LoadedPolicy {
    source: String,
    definition: Arc<PolicyDefinition>,
}

#[derive(Debug, Default)]
struct PolicyState {
    versions: BTreeMap<String, String>,
    policies: Vec<LoadedPolicy>,
}

impl PolicyState {
    fn definitions(&self) -> Vec<Arc<PolicyDefinition>> {
        self.policies.iter().map(|p| Arc::clone(&p.definition)).collect()
    }
}

/// The loaded policy set in every form an evaluation reads it. Replaced as a
/// whole on reload, so one evaluation never sees two policy sets.
#[derive(Debug, Default)]
struct PolicySnapshot {
    state: PolicyState,
    definitions: Vec<Arc<PolicyDefinition>>,
    compiled: Vec<CompiledPolicy>,
}

impl PolicySnapshot {
    fn scoped_ids(&self, direction: Direction) -> Vec<String> {
        self.definitions
            .iter()
            .filter(|d| d.applies_to(direction))
            .map(|d| d.id.clone())
            .collect()
    }
}

/// Content policy engine for text flowing into and out of a model.
pub struct GuardrailEngine {
    config: GuardrailConfig,
    compiler: PolicyCompiler,
    fast_rules: FastRules,
    augmentation: PromptAugmentation,
    fallback: ClassificationFallback,
    telemetry: Telemetry,
    snapshot: RwLock<Arc<PolicySnapshot>>,
    reload_lock: Mutex<()>,
}

impl GuardrailEngine {
    /// Create an engine builder.
    pub fn builder() -> GuardrailEngineBuilder {
        GuardrailEngineBuilder::new()
    }

    /// Evaluate text sent to the model.
    pub async fn evaluate_input(&self, text: &str, options: &EvaluationOptions) -> GuardrailResult {
        self.evaluate(text, Direction::Inbound, options).await
    }

    /// Evaluate text produced by the model.
    pub async fn evaluate_output(&self, text: &str, options: &EvaluationOptions) -> GuardrailResult {
        self.evaluate(text, Direction::Outbound, options).await
    }

    /// Evaluate host-supplied JSON. Non-string values are allowed unchecked.
    pub async fn evaluate_value(
        &self,
        value: &serde_json::Value,
        direction: Direction,
        options: &EvaluationOptions,
    ) -> GuardrailResult {
        match value {
            serde_json::Value::String(text) => self.evaluate(text, direction, options).await,
            _ => {
                let result = GuardrailResult::allow(direction).with_reason(NON_TEXT_REASON);
                self.telemetry.record_evaluation(&result);
                result
            }
        }
    }

    /// Evaluate `text` for `direction`.
    ///
    /// Never fails: internal errors are resolved through the configured
    /// failure mode and reported in `reason`.
    pub async fn evaluate(
        &self,
        text: &str,
        direction: Direction,
        options: &EvaluationOptions,
    ) -> GuardrailResult {
        let start = Instant::now();

        if text.trim().is_empty() {
            let result = GuardrailResult::no_content(direction).with_evaluation_time(start.elapsed());
            self.telemetry.record_evaluation(&result);
            return result;
        }

        let snapshot = self.snapshot();
        let outcome = if self.config.fast_rules_enabled {
            match guarded(|| self.run_fast_rules(&snapshot, text, direction)) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let result = self
                        .failure_result(&e, direction)
                        .with_evaluation_time(start.elapsed());
                    self.telemetry.record_evaluation(&result);
                    return result;
                }
            }
        } else {
            FastRuleOutcome::default()
        };

        let mut evaluated = if self.config.fast_rules_enabled {
            outcome.evaluated_policies
        } else {
            snapshot.scoped_ids(direction)
        };
        let mut matches = outcome.matches;
        let mut llm_evaluation = None;

        if !outcome.blocked && !options.skip_fallback && self.fallback.is_active() {
            let timeout = options
                .llm_timeout()
                .unwrap_or_else(|| self.config.llm.timeout());
            if let Some(verdict) = self
                .fallback
                .evaluate_scoped(text, &matches, direction, timeout, &snapshot.definitions)
                .await
            {
                self.telemetry.record_fallback(verdict.is_degraded());
                merge_verdict(&snapshot, &verdict, direction, &mut matches);
                for id in snapshot.scoped_ids(direction) {
                    if !evaluated.contains(&id) {
                        evaluated.push(id);
                    }
                }
                llm_evaluation = Some(verdict);
            }
        }

        let blocked = matches.iter().any(|m| m.blocked);
        let triggered = triggered_ids(&matches);

        let mut result = GuardrailResult::allow(direction).with_blocked(blocked);
        result.reason = Some(verdict_reason(blocked, &triggered, &matches));
        if self.config.augmentation_enabled && (!matches.is_empty() || options.request_guidelines) {
            result.guidelines = Some(self.augmentation.guidelines_for(&snapshot.definitions, &matches));
        }
        result.transformed_input = outcome.transformed;
        result.policy_usage = PolicyUsageInfo {
            evaluation_count: evaluated.len(),
            evaluated_policies: evaluated,
            triggered_policies: triggered.clone(),
            direction,
        };
        result.triggered_policies = triggered;
        result.matches = matches;
        result.llm_evaluation = llm_evaluation;
        let result = result.with_evaluation_time(start.elapsed());

        debug!(
            evaluation_id = %result.evaluation_id,
            direction = %direction,
            blocked = result.blocked,
            matches = result.matches.len(),
            user_id = options.user_id.as_deref().unwrap_or(""),
            session_id = options.session_id.as_deref().unwrap_or(""),
            metadata = ?options.metadata,
            duration_ms = result.evaluation_duration_ms,
            "Guardrail evaluation complete"
        );
        self.telemetry.record_evaluation(&result);
        result
    }

    fn run_fast_rules(
        &self,
        snapshot: &PolicySnapshot,
        text: &str,
        direction: Direction,
    ) -> FastRuleOutcome {
        #[cfg(test)]
        tests::fault_point();
        self.fast_rules.evaluate_with(&snapshot.compiled, text, direction)
    }

    /// Result for an evaluation that failed internally.
    fn failure_result(&self, error: &Error, direction: Direction) -> GuardrailResult {
        self.telemetry.record_error();
        error!(
            error = %error,
            category = error.category(),
            failure_mode = self.config.failure_mode.as_str(),
            "Guardrail evaluation failed"
        );

        match self.config.failure_mode {
            FailureMode::Open => GuardrailResult::allow(direction).with_reason(format!(
                "Evaluation error, content allowed (failure mode: open): {}",
                error
            )),
            FailureMode::Closed => GuardrailResult::block(
                direction,
                format!(
                    "Evaluation error, content blocked (failure mode: closed): {}",
                    error
                ),
            ),
        }
    }

    fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// The fast rule evaluator, for registering rules at runtime.
    pub fn fast_rules(&self) -> &FastRules {
        &self.fast_rules
    }

    /// `text` followed by the guidelines for `matches`, ranked against the
    /// current policy set.
    pub fn augment_prompt(&self, text: &str, matches: &[PolicyMatch]) -> String {
        let snapshot = self.snapshot();
        render_augmented(
            text,
            &self.augmentation.guidelines_for(&snapshot.definitions, matches),
        )
    }

    /// The guideline generator, for registering guidelines at runtime.
    pub fn augmentation(&self) -> &PromptAugmentation {
        &self.augmentation
    }

    /// The engine configuration.
    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Evaluation counters.
    pub fn metrics(&self) -> TelemetryMetrics {
        self.telemetry.metrics()
    }

    /// IDs of the loaded policies, in declaration order.
    pub fn policy_ids(&self) -> Vec<String> {
        self.snapshot().definitions.iter().map(|d| d.id.clone()).collect()
    }

    /// Get a loaded policy by ID.
    pub fn get_policy(&self, id: &str) -> Option<Arc<PolicyDefinition>> {
        self.snapshot()
            .definitions
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    /// Summary of the loaded policy set.
    pub fn get_policy_stats(&self) -> PolicyStats {
        let snapshot = self.snapshot();
        let state = &snapshot.state;
        let mut stats = PolicyStats {
            total_policies: state.policies.len(),
            enabled_policies: 0,
            by_source: BTreeMap::new(),
            by_direction: BTreeMap::new(),
            by_action: BTreeMap::new(),
            versions: state.versions.clone(),
            custom_rules: self.fast_rules.rule_count(),
            cache: self.compiler.cache_stats(),
        };

        for policy in &state.policies {
            let definition = &policy.definition;
            if definition.enabled {
                stats.enabled_policies += 1;
            }
            *stats.by_source.entry(policy.source.clone()).or_default() += 1;
            *stats
                .by_direction
                .entry(definition.direction.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_action
                .entry(definition.action.as_str().to_string())
                .or_default() += 1;
        }

        stats
    }

    /// Replace the whole policy set with `document`. Runtime rules and
    /// guidelines are kept. On error the previous set stays active.
    pub fn reload(&self, document: PolicyFile, source: &str) -> Result<()> {
        let state = build_state(vec![(source.to_string(), document)])?;
        self.install(state);
        info!(source, "Policies reloaded");
        Ok(())
    }

    /// Reload from a source.
    pub async fn reload_from(&self, source: &PolicySource) -> Result<()> {
        let document = source.load().await?;
        self.reload(document, &source.label())
    }

    /// Compile `state` and swap it in. Concurrent installs are serialized.
    fn install(&self, state: PolicyState) {
        let _reload = self.reload_lock.lock();

        let definitions = state.definitions();
        let compiled = self
            .compiler
            .compile(&definitions.iter().map(|d| (**d).clone()).collect::<Vec<_>>());

        self.fast_rules.replace_policies(compiled.clone());
        self.augmentation.replace_policies(definitions.clone());
        self.fallback.replace_policies(definitions.clone());
        *self.snapshot.write() = Arc::new(PolicySnapshot {
            state,
            definitions,
            compiled,
        });
    }
}

/// Fold a classifier verdict into `matches`.
///
/// A violation naming a policy scoped to the other direction is recorded
/// under [`LLM_EVALUATION_RULE`], never under that policy's ID.
fn merge_verdict(
    snapshot: &PolicySnapshot,
    verdict: &LlmEvaluationResult,
    direction: Direction,
    matches: &mut Vec<PolicyMatch>,
) {
    let mut seen: HashSet<String> = matches.iter().map(|m| m.rule_id.clone()).collect();

    for violation in &verdict.violations {
        let named = snapshot.definitions.iter().find(|d| d.id == violation.kind);

        let mut found = match named {
            Some(definition) if definition.applies_to(direction) => {
                PolicyMatch::for_policy(definition, direction, MatchSource::Classifier, None)
            }
            _ => {
                let action = if violation.severity >= Severity::High {
                    PolicyAction::Block
                } else {
                    PolicyAction::Warn
                };
                let rule_id = if named.is_some() || violation.kind.trim().is_empty() {
                    LLM_EVALUATION_RULE.to_string()
                } else {
                    violation.kind.clone()
                };
                PolicyMatch::new(
                    rule_id,
                    "",
                    action,
                    violation.severity,
                    direction,
                    MatchSource::Classifier,
                )
            }
        };
        if !violation.description.is_empty() {
            found.message = violation.description.clone();
        }

        if seen.insert(found.rule_id.clone()) {
            matches.push(found);
        }
    }

    if verdict.requests_block() && !matches.iter().any(|m| m.blocked) {
        let rule_id = if verdict.is_degraded() {
            LLM_EVALUATION_ERROR_RULE
        } else {
            LLM_EVALUATION_RULE
        };
        let message = if verdict.reasoning.is_empty() {
            "Classifier judged the content unsafe".to_string()
        } else {
            verdict.reasoning.clone()
        };
        matches.push(PolicyMatch::new(
            rule_id,
            message,
            PolicyAction::Block,
            Severity::High,
            direction,
            MatchSource::Classifier,
        ));
    }
}

/// Run `f`, turning a panic into an internal error.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Error::internal(format!("fast rule evaluation panicked: {}", detail))
    })
}

fn triggered_ids(matches: &[PolicyMatch]) -> Vec<String> {
    let mut seen = HashSet::new();
    matches
        .iter()
        .filter(|m| seen.insert(m.rule_id.as_str()))
        .map(|m| m.rule_id.clone())
        .collect()
}

fn verdict_reason(blocked: bool, triggered: &[String], matches: &[PolicyMatch]) -> String {
    if blocked {
        let blocking: Vec<&str> = triggered
            .iter()
            .filter(|id| matches.iter().any(|m| &m.rule_id == *id && m.blocked))
            .map(String::as_str)
            .collect();
        format!("Blocked by policy: {}", blocking.join(", "))
    } else if triggered.is_empty() {
        NO_VIOLATION_REASON.to_string()
    } else {
        format!("Policy warnings: {}", triggered.join(", "))
    }
}

/// Merge labelled documents into one policy set. Policy IDs must be unique
/// across documents.
fn build_state(documents: Vec<(String, PolicyFile)>) -> Result<PolicyState> {
    let mut state = PolicyState::default();
    let mut ids = HashSet::new();

    for (source, document) in documents {
        document.validate()?;
        for definition in document.policies {
            if !ids.insert(definition.id.clone()) {
                return Err(Error::policy_format_for(
                    format!("Duplicate policy ID across sources (second in {})", source),
                    &definition.id,
                ));
            }
            state.policies.push(LoadedPolicy {
                source: source.clone(),
                definition: Arc::new(definition),
            });
        }
        state.versions.insert(source, document.version);
    }

    Ok(state)
}

/// Summary of the loaded policy set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyStats {
    /// Number of loaded policies
    pub total_policies: usize,
    /// Number of enabled policies
    pub enabled_policies: usize,
    /// Policies per source label
    pub by_source: BTreeMap<String, usize>,
    /// Policies per direction
    pub by_direction: BTreeMap<String, usize>,
    /// Policies per action
    pub by_action: BTreeMap<String, usize>,
    /// Document version per source label
    pub versions: BTreeMap<String, String>,
    /// Number of runtime rules
    pub custom_rules: usize,
    /// Matcher cache statistics
    pub cache: CacheStats,
}

/// Builder for [`GuardrailEngine`].
pub struct GuardrailEngineBuilder {
    config: GuardrailConfig,
    documents: Vec<(String, PolicyFile)>,
    sources: Vec<PolicySource>,
    llm_service: Option<Arc<dyn LlmService>>,
}

impl GuardrailEngineBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: GuardrailConfig::default(),
            documents: Vec::new(),
            sources: Vec::new(),
            llm_service: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: GuardrailConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an already parsed policy document under `label`.
    pub fn with_policy_file(mut self, document: PolicyFile, label: impl Into<String>) -> Self {
        self.documents.push((label.into(), document));
        self
    }

    /// Add a source loaded during `build`.
    pub fn with_policy_source(mut self, source: PolicySource) -> Self {
        self.sources.push(source);
        self
    }

    /// Inject a classifier; overrides `llm.provider` in the configuration.
    pub fn with_llm_service(mut self, service: Arc<dyn LlmService>) -> Self {
        self.llm_service = Some(service);
        self
    }

    /// Build the engine.
    ///
    /// Without explicit documents or sources, policies are resolved from the
    /// configured source and the conventional file locations. Any load error
    /// aborts construction.
    pub async fn build(self) -> Result<GuardrailEngine> {
        self.config.validate()?;

        let mut documents = self.documents;
        for source in &self.sources {
            documents.push((source.label(), source.load().await?));
        }
        if documents.is_empty() {
            let (source, document) = PolicyLoader::from_config(&self.config.policy)
                .resolve()
                .await?;
            documents.push((source.label(), document));
        }

        let state = build_state(documents)?;

        let service = match self.llm_service {
            Some(service) => Some(service),
            None => classifier::from_config(&self.config.llm)?,
        };

        let engine = GuardrailEngine {
            compiler: PolicyCompiler::new(self.config.cache.max_entries),
            fast_rules: FastRules::default(),
            augmentation: PromptAugmentation::default(),
            fallback: ClassificationFallback::new(
                service,
                self.config.llm_fallback_enabled,
                Vec::new(),
            ),
            telemetry: Telemetry::new(),
            snapshot: RwLock::new(Arc::new(PolicySnapshot::default())),
            reload_lock: Mutex::new(()),
            config: self.config,
        };
        engine.install(state);

        info!(
            policies = engine.snapshot().definitions.len(),
            failure_mode = engine.config.failure_mode.as_str(),
            fallback = engine.fallback.service_name().unwrap_or("none"),
            "Guardrail engine ready"
        );
        Ok(engine)
    }
}

impl Default for GuardrailEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
