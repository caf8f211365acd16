//! Tracing setup and run/stage timing helpers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise `default_directive`
/// (for example `"info"` or `"genflow=debug"`). Fails if a global
/// subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_directive: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    }
}

/// Attributes describing one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpanAttributes {
    /// Pipeline name.
    pub pipeline: String,
    /// Request id of the run.
    pub request_id: String,
    /// Ordered stage names.
    pub stages: Vec<String>,
    /// Whether a result cache is attached.
    pub cache_enabled: bool,
    /// Whole-run deadline, if any.
    pub deadline_ms: Option<u64>,
}

impl RunSpanAttributes {
    /// Creates attributes for a run.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    /// Sets the stage list.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Marks whether caching is active.
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: Option<u64>) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    /// Event payload form.
    #[must_use]
    pub fn to_event_data(&self) -> Value {
        json!({
            "pipeline": self.pipeline,
            "stages": self.stages,
            "stage_count": self.stages.len(),
            "cache_enabled": self.cache_enabled,
            "deadline_ms": self.deadline_ms,
        })
    }
}

/// Wall-clock timer for a stage or phase.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
