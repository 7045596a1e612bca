//! Incremental evaluation of streamed model output.
//!
//! Chunks are held back until a check over the accumulated text passes, so a
//! violation can still be withheld or replaced before it reaches the caller.

use crate::api::{EvaluationOptions, GuardrailEngine, GuardrailResult};
use crate::config::{StreamViolationAction, StreamingConfig};

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of a [`StreamMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No chunk received yet
    Idle,
    /// Receiving chunks
    Accumulating,
    /// Evaluating the accumulated text
    Checking,
    /// Interrupted or finished; further chunks are dropped
    Terminated,
}

/// Evaluates a stream of output chunks every `check_interval` chunks.
pub struct StreamMonitor {
    engine: Arc<GuardrailEngine>,
    config: StreamingConfig,
    options: EvaluationOptions,
    stream_id: Uuid,
    state: StreamState,
    buffer: String,
    /// Chunks received since the last passing check
    pending: Vec<String>,
    chunks: usize,
    violations: Vec<GuardrailResult>,
}

impl StreamMonitor {
    /// Create a monitor.
    pub fn new(engine: Arc<GuardrailEngine>, config: StreamingConfig) -> Self {
        Self {
            engine,
            config,
            options: EvaluationOptions::default(),
            stream_id: Uuid::new_v4(),
            state: StreamState::Idle,
            buffer: String::new(),
            pending: Vec::new(),
            chunks: 0,
            violations: Vec::new(),
        }
    }

    /// Use these options for every check.
    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether no further output will be produced.
    pub fn is_terminated(&self) -> bool {
        self.state == StreamState::Terminated
    }

    /// Text accumulated so far, with replacements applied.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Blocking verdicts observed so far.
    pub fn violations(&self) -> &[GuardrailResult] {
        &self.violations
    }

    /// Accept a chunk and return the text that may be emitted now.
    pub async fn push(&mut self, chunk: &str) -> Vec<String> {
        if self.is_terminated() {
            return Vec::new();
        }

        self.state = StreamState::Accumulating;
        self.buffer.push_str(chunk);
        self.pending.push(chunk.to_string());
        self.chunks += 1;

        if self.chunks % self.config.check_interval.max(1) == 0 {
            self.check().await
        } else {
            Vec::new()
        }
    }

    /// End of stream: evaluate the full text once more and resolve the
    /// held-back tail.
    pub async fn finish(&mut self) -> Vec<String> {
        if self.is_terminated() {
            return Vec::new();
        }

        let released = if self.buffer.trim().is_empty() {
            std::mem::take(&mut self.pending)
        } else {
            self.check().await
        };

        self.state = StreamState::Terminated;
        debug!(
            stream_id = %self.stream_id,
            chunks = self.chunks,
            violations = self.violations.len(),
            "Stream finished"
        );
        released
    }

    async fn check(&mut self) -> Vec<String> {
        self.state = StreamState::Checking;
        let result = self.engine.evaluate_output(&self.buffer, &self.options).await;

        if !result.blocked {
            self.state = StreamState::Accumulating;
            return std::mem::take(&mut self.pending);
        }

        warn!(
            stream_id = %self.stream_id,
            policies = ?result.triggered_policies,
            action = ?self.config.on_stream_violation,
            "Stream violation detected"
        );
        self.violations.push(result);

        match self.config.on_stream_violation {
            StreamViolationAction::Interrupt => {
                self.pending.clear();
                self.state = StreamState::Terminated;
                vec![self.config.replacement_message.clone()]
            }
            StreamViolationAction::Replace => {
                let tail: usize = self.pending.drain(..).map(|c| c.len()).sum();
                let keep = self.buffer.len() - tail;
                self.buffer.truncate(keep);
                self.buffer.push_str(&self.config.placeholder);
                self.state = StreamState::Accumulating;
                vec![self.config.placeholder.clone()]
            }
            StreamViolationAction::Continue => {
                self.state = StreamState::Accumulating;
                std::mem::take(&mut self.pending)
            }
        }
    }
}

struct GuardState<S, E> {
    monitor: StreamMonitor,
    upstream: std::pin::Pin<Box<S>>,
    queue: VecDeque<Result<String, E>>,
    done: bool,
}

/// Wrap a chunk stream so that its output is checked as it flows.
///
/// Upstream errors are passed through. After an interrupt the upstream is
/// no longer polled.
pub fn guard_stream<S, E>(
    engine: Arc<GuardrailEngine>,
    config: StreamingConfig,
    upstream: S,
) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<String, E>>,
{
    let state = GuardState {
        monitor: StreamMonitor::new(engine, config),
        upstream: Box::pin(upstream),
        queue: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queue.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }

            match st.upstream.next().await {
                Some(Ok(chunk)) => {
                    let released = st.monitor.push(&chunk).await;
                    st.queue.extend(released.into_iter().map(Ok));
                    st.done = st.monitor.is_terminated();
                }
                Some(Err(e)) => st.queue.push_back(Err(e)),
                None => {
                    let released = st.monitor.finish().await;
                    st.queue.extend(released.into_iter().map(Ok));
                    st.done = true;
                }
            }
        }
    })
}
