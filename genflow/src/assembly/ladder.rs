//! The per-asset compression ladder.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::budget::{AssetClass, BudgetConfig};
use super::transcode::{ImageTranscoder, TranscodeRequest};
use crate::errors::AssemblyFailureReason;

/// How the embedded bytes were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedStrategy {
    /// Raw bytes already fit the class target.
    AsIs,
    /// Raw bytes exceeded the target; not re-encodable but within the maximum.
    Oversized,
    /// Re-encoded by the ladder.
    Compressed,
}

/// Bytes chosen for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderResult {
    /// Bytes to embed.
    pub bytes: Vec<u8>,
    /// Media type of `bytes`.
    pub media_type: String,
    /// Encoder quality, when re-encoded lossily.
    pub quality: Option<u8>,
    /// Encode attempts made.
    pub rungs_tried: usize,
    /// Strategy that produced `bytes`.
    pub strategy: EmbedStrategy,
}

/// Shrinks `bytes` to fit the budget of `class`.
///
/// Raw bytes within the class target are returned untouched. Otherwise the
/// image is resized to the class dimension and re-encoded at descending
/// qualities, stopping at the first result within target. The smallest
/// candidate (including the raw bytes) wins; if even that exceeds the class
/// maximum the asset is rejected.
pub fn compress_to_budget(
    transcoder: &dyn ImageTranscoder,
    bytes: &[u8],
    media_type: &str,
    class: AssetClass,
    config: &BudgetConfig,
) -> Result<LadderResult, AssemblyFailureReason> {
    let budget = config.budget_for(class);

    if bytes.len() <= budget.target_bytes {
        return Ok(LadderResult {
            bytes: bytes.to_vec(),
            media_type: media_type.to_string(),
            quality: None,
            rungs_tried: 0,
            strategy: EmbedStrategy::AsIs,
        });
    }

    let raw_fallback = |rungs_tried: usize| {
        (bytes.len() <= budget.max_bytes).then(|| LadderResult {
            bytes: bytes.to_vec(),
            media_type: media_type.to_string(),
            quality: None,
            rungs_tried,
            strategy: EmbedStrategy::Oversized,
        })
    };

    if media_type == "image/svg+xml" {
        return raw_fallback(0).ok_or(AssemblyFailureReason::OverClassBudget {
            best_bytes: bytes.len(),
            max_bytes: budget.max_bytes,
        });
    }

    let max_dimension = config.dimension_for(class);
    let mut best: Option<LadderResult> = None;
    let mut rungs_tried = 0;
    let mut last_error = None;

    for quality in config.quality_ladder(class) {
        rungs_tried += 1;
        let request = TranscodeRequest {
            max_dimension,
            quality,
            preserve_alpha: class.prefers_lossless(),
        };
        let candidate = match transcoder.transcode(bytes, &request) {
            Ok(candidate) => candidate,
            Err(error) => {
                debug!(%class, quality, error = %error, "Transcode rung failed");
                last_error = Some(error);
                break;
            }
        };

        let size = candidate.bytes.len();
        debug!(%class, quality, size, target = budget.target_bytes, "Ladder rung");
        let lossless = candidate.quality.is_none();
        if best.as_ref().map_or(true, |b| size < b.bytes.len()) {
            best = Some(LadderResult {
                bytes: candidate.bytes,
                media_type: candidate.media_type,
                quality: candidate.quality,
                rungs_tried,
                strategy: EmbedStrategy::Compressed,
            });
        }
        if size <= budget.target_bytes || lossless {
            break;
        }
    }

    let had_candidate = best.is_some();
    match best {
        Some(mut result) if result.bytes.len() < bytes.len() => {
            result.rungs_tried = rungs_tried;
            if result.bytes.len() <= budget.max_bytes {
                Ok(result)
            } else {
                Err(AssemblyFailureReason::OverClassBudget {
                    best_bytes: result.bytes.len(),
                    max_bytes: budget.max_bytes,
                })
            }
        }
        _ => raw_fallback(rungs_tried).ok_or_else(|| match last_error {
            Some(error) if !had_candidate => AssemblyFailureReason::Transcode {
                message: error.to_string(),
            },
            _ => AssemblyFailureReason::OverClassBudget {
                best_bytes: bytes.len(),
                max_bytes: budget.max_bytes,
            },
        }),
    }
}
