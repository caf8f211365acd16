//! Testing utilities for genflow pipelines.
//!
//! This module provides:
//! - Mock stages with call counting and scripted failures
//! - A progress recorder
//! - Sample documents, assets and fast retry settings

mod fixtures;
mod mocks;

pub use fixtures::{
    fast_retry_config, jpeg_asset, jpeg_bytes, png_asset, png_bytes, sample_assets, test_engine,
    SAMPLE_DOCUMENT,
};
pub use mocks::{FailingStage, ProgressRecorder, ScriptedStage, StaticStage};
