//! Pipeline definition and execution.
//!
//! This module provides:
//! - The [`Stage`] trait and the contracts stages declare
//! - [`PipelineBuilder`], which validates stage wiring up front
//! - [`Orchestrator`], which runs stages in order through the retry engine
//!   and result cache and finishes with artifact assembly

mod builder;
mod context;
mod orchestrator;
mod progress;
mod request;
mod stage;

#[cfg(test)]
mod integration_tests;

pub use builder::{Pipeline, PipelineBuilder, DEFAULT_DOCUMENT_KEY};
pub use context::{Contribution, StageContext, StageContract, StageView};
pub use orchestrator::{FinalResult, Orchestrator, RunReport, StageRecord, ASSEMBLY_STAGE};
pub use progress::{ProgressObserver, ProgressUpdate};
pub use request::GenerationRequest;
pub use stage::{FnStage, Stage};
