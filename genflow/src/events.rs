//! Run lifecycle events and the sinks that receive them.
//!
//! The orchestrator emits one [`PipelineEvent`] per lifecycle step
//! (`pipeline.started`, `stage.started`, `stage.completed`, `stage.failed`,
//! `assembly.completed`, `pipeline.completed`, `pipeline.failed`,
//! `pipeline.cancelled`). Sinks are injected per orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, Level};
use uuid::Uuid;

/// One lifecycle event of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Dotted event name, e.g. `stage.completed`.
    pub name: String,
    /// The run this event belongs to.
    pub request_id: Uuid,
    /// The stage involved, if any.
    pub stage: Option<String>,
    /// Event-specific payload.
    pub data: Value,
    /// Emission time.
    pub at: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(name: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            name: name.into(),
            request_id,
            stage: None,
            data: Value::Null,
            at: Utc::now(),
        }
    }

    /// Attaches the stage name.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Receives pipeline events.
///
/// Implementations must not fail; anything that goes wrong inside a sink
/// is its own business to log.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event: PipelineEvent);

    /// Emits an event without awaiting.
    fn try_emit(&self, event: PipelineEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: PipelineEvent) {}

    fn try_emit(&self, _event: PipelineEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at `level` (DEBUG or INFO; anything else logs at INFO).
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log(&self, event: &PipelineEvent) {
        let stage = event.stage.as_deref().unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                event = %event.name,
                request_id = %event.request_id,
                stage,
                data = %event.data,
                "Pipeline event"
            );
        } else {
            info!(
                event = %event.name,
                request_id = %event.request_id,
                stage,
                data = %event.data,
                "Pipeline event"
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.log(&event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.log(&event);
    }
}

/// Keeps every event in memory; meant for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the event names in emission order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Returns events whose name starts with `prefix`.
    #[must_use]
    pub fn events_named(&self, prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }
}
