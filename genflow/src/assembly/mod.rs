//! Size-budgeted artifact assembly.
//!
//! Scans a generated document for asset references, classifies and resolves
//! each against the produced assets, shrinks them through a quality ladder,
//! inlines them as data URIs and optionally minifies the result.

mod assembler;
mod asset;
mod budget;
mod classify;
mod ladder;
mod minify;
mod resolve;
mod scan;
mod transcode;

pub use assembler::{ArtifactAssembler, AssemblyResult, AssetOutcome, AssetStatus};
pub use asset::{AssetSet, ProducedAsset};
pub use budget::{AssetClass, BudgetConfig, EmbeddingBudget};
pub use classify::{classify, ClassificationBasis, HERO_MIN_EDGE, ICON_MAX_EDGE};
pub use ladder::{compress_to_budget, EmbedStrategy, LadderResult};
pub use minify::{minify_css, minify_document};
pub use resolve::{resolve, MatchRule, Resolution};
pub use scan::{is_asset_locator, scan_references, AssetReference, ReferenceKind, SizeHint, ASSET_EXTENSIONS};
#[cfg(feature = "raster")]
pub use transcode::RasterTranscoder;
pub use transcode::{
    default_transcoder, sniff_media_type, ImageTranscoder, PassthroughTranscoder, TranscodeError,
    TranscodeRequest, Transcoded,
};
