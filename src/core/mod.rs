//! Local evaluation layers: fast rules and guideline generation.

pub mod augmentation;
pub mod fast_rules;

pub use augmentation::{render_augmented, PromptAugmentation, GUIDELINES_HEADER};
pub use fast_rules::{FastRuleOutcome, FastRules, RuleDefinition, NON_TEXT_REASON};
