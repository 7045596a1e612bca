//! Compilation of policy patterns and domain keywords into matchers.

use super::{Direction, PolicyDefinition};
use crate::cache::{CacheStats, MatcherCache};

use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on the compiled size of a single policy regex.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Kind of source string a matcher was compiled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// Regular expression from `patterns`
    Pattern,
    /// Keyword from `domains`
    Domain,
}

/// A compiled pattern or keyword.
///
/// A matcher whose source failed to compile holds no regex and never matches.
#[derive(Debug)]
pub struct CompiledMatcher {
    kind: MatcherKind,
    source: String,
    regex: Option<Regex>,
}

impl CompiledMatcher {
    /// Compile a policy pattern (case-insensitive). Invalid syntax yields a
    /// never-matching matcher and a warning.
    pub fn pattern(raw: &str) -> Self {
        let regex = RegexBuilder::new(raw)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build();

        match regex {
            Ok(regex) => Self {
                kind: MatcherKind::Pattern,
                source: raw.to_string(),
                regex: Some(regex),
            },
            Err(e) => {
                let err = crate::Error::pattern_compile(raw, e.to_string());
                warn!(error = %err, "Pattern disabled; it will never match");
                Self::never(MatcherKind::Pattern, raw)
            }
        }
    }

    /// Compile a domain keyword into a case-insensitive whole-word matcher.
    ///
    /// Word boundaries are only required at ends of the keyword that are word
    /// characters, so keywords such as `c++` or `C#` still match.
    pub fn domain(raw: &str) -> Self {
        let keyword = raw.trim();
        let leading = if keyword.chars().next().is_some_and(is_word_char) { r"\b" } else { "" };
        let trailing = if keyword.chars().last().is_some_and(is_word_char) { r"\b" } else { "" };
        let regex = RegexBuilder::new(&format!("{}{}{}", leading, regex::escape(keyword), trailing))
            .case_insensitive(true)
            .build();

        match regex {
            Ok(regex) => Self {
                kind: MatcherKind::Domain,
                source: raw.to_string(),
                regex: Some(regex),
            },
            Err(e) => {
                let err = crate::Error::pattern_compile(raw, e.to_string());
                warn!(error = %err, "Domain keyword disabled; it will never match");
                Self::never(MatcherKind::Domain, raw)
            }
        }
    }

    fn never(kind: MatcherKind, raw: &str) -> Self {
        Self {
            kind,
            source: raw.to_string(),
            regex: None,
        }
    }

    /// Find the first match in `text`.
    pub fn find<'t>(&self, text: &'t str) -> Option<regex::Match<'t>> {
        self.regex.as_ref()?.find(text)
    }

    /// Whether the source compiled successfully.
    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    /// The raw source string.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The matcher kind.
    pub fn kind(&self) -> MatcherKind {
        self.kind
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A policy definition together with its compiled matchers.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    /// The underlying definition
    pub definition: Arc<PolicyDefinition>,
    /// Compiled `patterns`, in declaration order
    pub patterns: Vec<Arc<CompiledMatcher>>,
    /// Compiled `domains`, in declaration order
    pub domains: Vec<Arc<CompiledMatcher>>,
}

impl CompiledPolicy {
    /// Whether the policy takes part in an evaluation in `direction`.
    pub fn applies_to(&self, direction: Direction) -> bool {
        self.definition.applies_to(direction)
    }

    /// Number of matchers that failed to compile.
    pub fn invalid_matchers(&self) -> usize {
        self.patterns
            .iter()
            .chain(self.domains.iter())
            .filter(|m| !m.is_valid())
            .count()
    }
}

/// Compiles policy definitions, reusing matchers through a bounded cache.
pub struct PolicyCompiler {
    cache: MatcherCache,
}

impl PolicyCompiler {
    /// Create a compiler whose cache holds at most `max_entries` matchers.
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: MatcherCache::new(max_entries),
        }
    }

    /// Compile every policy. Never fails: broken patterns degrade to
    /// never-matching matchers.
    pub fn compile(&self, policies: &[PolicyDefinition]) -> Vec<CompiledPolicy> {
        let compiled: Vec<_> = policies.iter().map(|p| self.compile_one(p)).collect();

        let invalid: usize = compiled.iter().map(|p| p.invalid_matchers()).sum();
        debug!(
            policies = compiled.len(),
            invalid_matchers = invalid,
            "Compiled policy set"
        );

        compiled
    }

    /// Compile a single policy.
    pub fn compile_one(&self, policy: &PolicyDefinition) -> CompiledPolicy {
        let patterns = policy
            .patterns
            .iter()
            .map(|raw| {
                self.cache
                    .get_or_compile(MatcherKind::Pattern, raw, || CompiledMatcher::pattern(raw))
            })
            .collect();

        let domains = policy
            .domains
            .iter()
            .map(|raw| {
                self.cache
                    .get_or_compile(MatcherKind::Domain, raw, || CompiledMatcher::domain(raw))
            })
            .collect();

        CompiledPolicy {
            definition: Arc::new(policy.clone()),
            patterns,
            domains,
        }
    }

    /// Statistics of the matcher cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached matcher.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for PolicyCompiler {
    fn default() -> Self {
        Self::new(1000)
    }
}
