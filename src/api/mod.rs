//! Public API of the guardrail engine.
//!
//! [`GuardrailEngine`] composes the fast rules, the classification fallback
//! and the guideline generator into one verdict per call.

mod engine;
mod options;
mod result;

pub use engine::{
    GuardrailEngine, GuardrailEngineBuilder, PolicyStats, LLM_EVALUATION_ERROR_RULE,
    LLM_EVALUATION_RULE,
};
pub use options::EvaluationOptions;
pub use result::{
    GuardrailResult, MatchSource, PolicyMatch, PolicyUsageInfo, NO_CONTENT_REASON,
    NO_VIOLATION_REASON,
};
