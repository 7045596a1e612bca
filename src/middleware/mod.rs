//! Wrapping of model-calling handlers with input and output checks.

mod extract;

pub use extract::{extract_first, user_messages, ContentExtractor};

use crate::api::{EvaluationOptions, GuardrailEngine, GuardrailResult};

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Message substituted for a blocked response when replacement is enabled.
pub const DEFAULT_BLOCKED_OUTPUT_MESSAGE: &str = "[Response withheld: content policy violation]";

/// Error returned by a wrapped handler.
#[derive(Error, Debug)]
pub enum GuardError {
    /// The request was blocked before reaching the handler
    #[error("Input blocked: {}", reason(.0))]
    InputBlocked(Box<GuardrailResult>),

    /// The handler's response was blocked
    #[error("Output blocked: {}", reason(.0))]
    OutputBlocked(Box<GuardrailResult>),

    /// The handler itself failed
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

fn reason(result: &GuardrailResult) -> &str {
    result.reason.as_deref().unwrap_or("policy violation")
}

impl GuardError {
    /// The verdict that caused the block, if any.
    pub fn result(&self) -> Option<&GuardrailResult> {
        match self {
            GuardError::InputBlocked(r) | GuardError::OutputBlocked(r) => Some(&**r),
            GuardError::Handler(_) => None,
        }
    }
}

/// Behavior of [`GuardrailMiddleware`].
#[derive(Debug, Clone)]
pub struct MiddlewareOptions {
    /// Check requests before calling the handler
    pub check_input: bool,
    /// Check responses after the handler returns
    pub check_output: bool,
    /// Append triggered guidelines to the request text
    pub augment_prompt: bool,
    /// Replace a blocked response's text instead of failing
    pub replace_blocked_output: bool,
    /// Text used when replacing a blocked response
    pub blocked_output_message: String,
    /// Options passed to every evaluation
    pub evaluation: EvaluationOptions,
}

impl Default for MiddlewareOptions {
    fn default() -> Self {
        Self {
            check_input: true,
            check_output: true,
            augment_prompt: false,
            replace_blocked_output: false,
            blocked_output_message: DEFAULT_BLOCKED_OUTPUT_MESSAGE.to_string(),
            evaluation: EvaluationOptions::default(),
        }
    }
}

/// Checks payloads around a handler using a shared engine.
#[derive(Clone)]
pub struct GuardrailMiddleware {
    engine: Arc<GuardrailEngine>,
    options: MiddlewareOptions,
}

impl GuardrailMiddleware {
    /// Create a middleware with default options.
    pub fn new(engine: Arc<GuardrailEngine>) -> Self {
        Self {
            engine,
            options: MiddlewareOptions::default(),
        }
    }

    /// Set the options.
    pub fn with_options(mut self, options: MiddlewareOptions) -> Self {
        self.options = options;
        self
    }

    /// Check a request. Returns it, possibly rewritten or augmented.
    ///
    /// The text found by the first matching strategy is checked, and so is
    /// every other user message the handler would receive. Any block fails
    /// the request.
    pub async fn guard_input(&self, mut request: Value) -> Result<Value, GuardError> {
        if !self.options.check_input {
            return Ok(request);
        }
        let primary = extract_first(ContentExtractor::INPUT, &request);

        let mut history = user_messages(&request);
        if matches!(primary, Some((ContentExtractor::MessagesLastUser, _))) {
            history.pop();
        }
        for text in &history {
            let result = self
                .engine
                .evaluate_input(text, &self.options.evaluation)
                .await;
            if result.blocked {
                warn!(strategy = "messages_user", policies = ?result.triggered_policies, "Request blocked");
                return Err(GuardError::InputBlocked(Box::new(result)));
            }
        }

        let Some((strategy, text)) = primary else {
            debug!("No request text found, skipping input check");
            return Ok(request);
        };

        let result = self
            .engine
            .evaluate_input(&text, &self.options.evaluation)
            .await;
        if result.blocked {
            warn!(strategy = strategy.name(), policies = ?result.triggered_policies, "Request blocked");
            return Err(GuardError::InputBlocked(Box::new(result)));
        }

        let mut text = text;
        if let Some(transformed) = &result.transformed_input {
            text = transformed.clone();
            strategy.replace(&mut request, &text);
        }
        if self.options.augment_prompt && result.has_matches() {
            let augmented = self.engine.augment_prompt(&text, &result.matches);
            strategy.replace(&mut request, &augmented);
        }

        Ok(request)
    }

    /// Check a response. Returns it, possibly replaced.
    pub async fn guard_output(&self, mut response: Value) -> Result<Value, GuardError> {
        if !self.options.check_output {
            return Ok(response);
        }
        let Some((strategy, text)) = extract_first(ContentExtractor::OUTPUT, &response) else {
            debug!("No response text found, skipping output check");
            return Ok(response);
        };

        let result = self
            .engine
            .evaluate_output(&text, &self.options.evaluation)
            .await;
        if !result.blocked {
            return Ok(response);
        }

        warn!(strategy = strategy.name(), policies = ?result.triggered_policies, "Response blocked");
        if self.options.replace_blocked_output
            && strategy.replace(&mut response, &self.options.blocked_output_message)
        {
            return Ok(response);
        }
        Err(GuardError::OutputBlocked(Box::new(result)))
    }

    /// Wrap `handler` so every call is checked on the way in and out.
    pub fn wrap<F, Fut>(
        &self,
        handler: F,
    ) -> impl Fn(Value) -> BoxFuture<'static, Result<Value, GuardError>> + Clone + Send + Sync
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let middleware = self.clone();
        let handler = Arc::new(handler);

        move |request| -> BoxFuture<'static, Result<Value, GuardError>> {
            let middleware = middleware.clone();
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request = middleware.guard_input(request).await?;
                let response = handler(request).await?;
                middleware.guard_output(response).await
            })
        }
    }
}
