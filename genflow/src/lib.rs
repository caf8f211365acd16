//! # Genflow
//!
//! A resilient multi-stage content generation pipeline.
//!
//! Genflow runs an ordered list of generation stages against external
//! providers and packages the result into a single self-contained document:
//!
//! - **Stage contracts**: every stage declares what it reads and writes,
//!   checked when the pipeline is built and again on every contribution
//! - **Resilience**: exponential backoff with jitter and a per-stage
//!   circuit breaker shared across runs
//! - **Result caching**: fingerprint-keyed TTL/LRU cache for deterministic stages
//! - **Artifact assembly**: asset references are resolved, compressed down a
//!   quality ladder and inlined as data URIs under per-class and total budgets
//! - **Observability**: lifecycle events, progress callbacks and `tracing` spans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genflow::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("landing_page")
//!     .with_seed_keys(["keyword"])
//!     .stage(Arc::new(OutlineStage::new(client.clone())))?
//!     .stage(Arc::new(CopyStage::new(client.clone())))?
//!     .stage(Arc::new(ImageStage::new(client)))?
//!     .build()?;
//!
//! let orchestrator = Orchestrator::from_config(pipeline, &GenflowConfig::default())?;
//! let seed = StageContext::new().with_field("keyword", "trail shoes");
//! let result = orchestrator
//!     .run(&GenerationRequest::new(), seed, &CancellationToken::new())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod assembly;
pub mod cache;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assembly::{
        ArtifactAssembler, AssemblyResult, AssetClass, AssetSet, AssetStatus, BudgetConfig, ProducedAsset,
    };
    pub use crate::cache::{CacheConfig, Fingerprint, ResultCache};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::GenflowConfig;
    pub use crate::errors::{
        GenflowError, PipelineError, PipelineFailure, PipelineValidationError, ProviderError,
        ProviderErrorKind, RetryError, ValidationError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::fanout::Fanout;
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        Contribution, FinalResult, FnStage, GenerationRequest, Orchestrator, Pipeline, PipelineBuilder,
        ProgressObserver, ProgressUpdate, RunReport, Stage, StageContext, StageContract, StageView,
    };
    pub use crate::resilience::{CircuitConfig, RetryConfig, RetryEngine};
    pub use crate::utils::{generate_request_id, iso_timestamp};
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_builds_a_pipeline() {
        let stage = FnStage::new(
            "copy",
            StageContract::new().writes(["document"]),
            |_view: StageView| async {
                Ok::<_, ProviderError>(Contribution::new("copy", 1).with_field("document", "<p/>"))
            },
        );
        let pipeline = PipelineBuilder::new("minimal")
            .stage(Arc::new(stage))
            .and_then(PipelineBuilder::build)
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["copy"]);
    }
}
