//! Progress reporting.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// The stage the update is about.
    pub stage: String,
    /// Overall completion, 0-100.
    pub percentage: u8,
    /// Human readable status.
    pub message: String,
}

impl ProgressUpdate {
    /// Creates an update.
    #[must_use]
    pub fn new(stage: impl Into<String>, percentage: u8, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            percentage: percentage.min(100),
            message: message.into(),
        }
    }
}

/// Receives progress updates. Must not influence the run.
pub trait ProgressObserver: Send + Sync {
    /// Called before and after every step.
    fn on_progress(&self, update: &ProgressUpdate);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update);
    }
}

/// Delivers `update`, swallowing observer panics.
pub(crate) fn notify(observer: &dyn ProgressObserver, update: &ProgressUpdate) {
    if catch_unwind(AssertUnwindSafe(|| observer.on_progress(update))).is_err() {
        warn!(stage = %update.stage, percentage = update.percentage, "Progress observer panicked");
    }
}

/// Percentage reached after `completed` of `total` steps.
pub(crate) fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(completed.min(total) * 100 / total).unwrap_or(100)
}
