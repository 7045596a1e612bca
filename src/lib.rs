//! # LLM Guardrails
//!
//! Content policy enforcement for text flowing into and out of language
//! models. Every evaluation runs a layered pipeline:
//!
//! - **Fast rules**: compiled regular expressions and domain keywords, evaluated
//!   synchronously in microseconds
//! - **Guidelines**: natural-language instructions for the model derived from
//!   what matched
//! - **Classifier fallback**: an optional LLM-backed verdict when the fast
//!   layer is inconclusive
//!
//! The engine never fails an evaluation. Internal errors are turned into a
//! verdict according to the configured [`FailureMode`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_guardrails::{EvaluationOptions, GuardrailEngine, PolicyFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = GuardrailEngine::builder()
//!         .with_policy_file(PolicyFile::builtin()?, "builtin")
//!         .build()
//!         .await?;
//!
//!     let result = engine
//!         .evaluate_output("Contact me at jane@example.com", &EvaluationOptions::default())
//!         .await;
//!
//!     if result.blocked {
//!         println!("Blocked: {}", result.reason.unwrap_or_default());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming and middleware
//!
//! [`stream::guard_stream`] checks model output incrementally, and
//! [`middleware::GuardrailMiddleware`] wraps a request handler so both
//! directions are checked around every call.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod core;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod stream;
pub mod telemetry;

// Re-export main types for convenience
pub use api::{
    EvaluationOptions, GuardrailEngine, GuardrailEngineBuilder, GuardrailResult, MatchSource,
    PolicyMatch, PolicyStats,
};
pub use classifier::{LlmEvaluationResult, LlmService};
pub use config::{FailureMode, GuardrailConfig, StreamViolationAction, StreamingConfig};
pub use error::{Error, Result};
pub use policy::{
    Direction, PolicyAction, PolicyDefinition, PolicyDirection, PolicyFile, PolicySource, Severity,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
