//! Logging setup and in-process evaluation counters.

use crate::api::GuardrailResult;
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Fails if a subscriber is
/// already installed.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::config_key(format!("invalid log filter: {}", e), "log_level"))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    installed.map_err(|e| Error::internal(format!("cannot install subscriber: {}", e)))
}

/// Evaluation counters for one engine.
#[derive(Debug, Default)]
pub struct Telemetry {
    evaluations_allowed: AtomicU64,
    evaluations_blocked: AtomicU64,
    /// Allowed evaluations that still recorded matches
    evaluations_warned: AtomicU64,
    errors: AtomicU64,
    fallback_calls: AtomicU64,
    fallback_failures: AtomicU64,
    total_evaluation_time_us: AtomicU64,
}

impl Telemetry {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished evaluation.
    pub fn record_evaluation(&self, result: &GuardrailResult) {
        if result.blocked {
            self.evaluations_blocked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.evaluations_allowed.fetch_add(1, Ordering::Relaxed);
            if result.has_matches() {
                self.evaluations_warned.fetch_add(1, Ordering::Relaxed);
            }
        }

        let duration_us = (result.evaluation_duration_ms * 1000.0) as u64;
        self.total_evaluation_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Record an error absorbed by the failure mode.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a classifier call and whether it degraded to the conservative verdict.
    pub fn record_fallback(&self, degraded: bool) {
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.fallback_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current metrics.
    pub fn metrics(&self) -> TelemetryMetrics {
        let evaluations_allowed = self.evaluations_allowed.load(Ordering::Relaxed);
        let evaluations_blocked = self.evaluations_blocked.load(Ordering::Relaxed);
        let total_evaluations = evaluations_allowed + evaluations_blocked;

        let total_time_us = self.total_evaluation_time_us.load(Ordering::Relaxed);
        let avg_evaluation_time_ms = if total_evaluations > 0 {
            (total_time_us as f64 / total_evaluations as f64) / 1000.0
        } else {
            0.0
        };

        TelemetryMetrics {
            total_evaluations,
            evaluations_allowed,
            evaluations_blocked,
            evaluations_warned: self.evaluations_warned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            fallback_failures: self.fallback_failures.load(Ordering::Relaxed),
            avg_evaluation_time_ms,
        }
    }
}

/// Snapshot of the evaluation counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryMetrics {
    /// Total number of evaluations
    pub total_evaluations: u64,
    /// Evaluations that allowed the content
    pub evaluations_allowed: u64,
    /// Evaluations that blocked the content
    pub evaluations_blocked: u64,
    /// Allowed evaluations with at least one match
    pub evaluations_warned: u64,
    /// Errors absorbed by the failure mode
    pub errors: u64,
    /// Classifier calls
    pub fallback_calls: u64,
    /// Classifier calls that degraded to the conservative verdict
    pub fallback_failures: u64,
    /// Average evaluation time in milliseconds
    pub avg_evaluation_time_ms: f64,
}
