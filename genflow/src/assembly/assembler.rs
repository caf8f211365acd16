//! The terminal assembly step: inline produced assets into the document.

use base64::{engine::general_purpose::STANDARD, Engine};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::asset::AssetSet;
use super::budget::{AssetClass, BudgetConfig};
use super::classify::{classify, ClassificationBasis};
use super::ladder::{compress_to_budget, EmbedStrategy};
use super::minify::minify_document;
use super::resolve::{resolve, MatchRule, Resolution};
use super::scan::{scan_references, AssetReference};
use super::transcode::{default_transcoder, ImageTranscoder};
use crate::errors::{AssemblyFailure, AssemblyFailureReason, ValidationError};

/// What happened to one distinct locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Inlined as a data URI.
    Embedded,
    /// No produced asset matched; reference left in place.
    Unresolved,
    /// Could not be brought under the class maximum.
    Dropped,
    /// The aggregate budget was spent before this asset.
    SkippedForBudget,
    /// The bytes could not be decoded.
    Failed,
}

/// Per-locator assembly record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutcome {
    /// Locator as written in the document.
    pub locator: String,
    /// Assigned class.
    pub class: AssetClass,
    /// Why that class was chosen.
    pub basis: ClassificationBasis,
    /// Final status.
    pub status: AssetStatus,
    /// Locator of the produced asset that matched.
    pub matched_locator: Option<String>,
    /// Ladder rule, for fuzzy matches.
    pub match_rule: Option<MatchRule>,
    /// Size of the produced asset.
    pub original_bytes: Option<usize>,
    /// Size of the embedded bytes.
    pub embedded_bytes: Option<usize>,
    /// Encoder quality, when re-encoded lossily.
    pub quality: Option<u8>,
    /// Media type of the embedded bytes.
    pub media_type: Option<String>,
    /// Hex MD5 of the embedded bytes.
    pub md5: Option<String>,
    /// Number of references to this locator in the document.
    pub occurrences: usize,
    /// How the embedded bytes were obtained.
    pub strategy: Option<EmbedStrategy>,
}

impl AssetOutcome {
    fn pending(locator: &str, class: AssetClass, basis: ClassificationBasis, occurrences: usize) -> Self {
        Self {
            locator: locator.to_string(),
            class,
            basis,
            status: AssetStatus::Unresolved,
            matched_locator: None,
            match_rule: None,
            original_bytes: None,
            embedded_bytes: None,
            quality: None,
            media_type: None,
            md5: None,
            occurrences,
            strategy: None,
        }
    }
}

/// Output of one `assemble()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyResult {
    /// The assembled document.
    pub document: String,
    /// One outcome per distinct locator, in document order.
    pub outcomes: Vec<AssetOutcome>,
    /// Bytes embedded in total. Never exceeds `total_budget`.
    pub aggregate_size: usize,
    /// The aggregate budget in force.
    pub total_budget: usize,
    /// Every locator that was not embedded.
    pub failures: Vec<AssemblyFailure>,
}

impl AssemblyResult {
    /// Number of embedded locators.
    #[must_use]
    pub fn embedded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == AssetStatus::Embedded)
            .count()
    }

    /// Outcome for `locator`, if it was referenced.
    #[must_use]
    pub fn outcome(&self, locator: &str) -> Option<&AssetOutcome> {
        self.outcomes.iter().find(|outcome| outcome.locator == locator)
    }
}

/// Inlines assets into documents under per-class and aggregate budgets.
#[derive(Clone)]
pub struct ArtifactAssembler {
    transcoder: Arc<dyn ImageTranscoder>,
}

impl fmt::Debug for ArtifactAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactAssembler").finish_non_exhaustive()
    }
}

impl Default for ArtifactAssembler {
    fn default() -> Self {
        Self::with_default_transcoder()
    }
}

struct LocatorGroup<'d> {
    first: &'d AssetReference,
    spans: Vec<Range<usize>>,
}

impl ArtifactAssembler {
    /// Creates an assembler using `transcoder` for the compression ladder.
    #[must_use]
    pub fn new(transcoder: Arc<dyn ImageTranscoder>) -> Self {
        Self { transcoder }
    }

    /// Creates an assembler with the best transcoder compiled in.
    #[must_use]
    pub fn with_default_transcoder() -> Self {
        Self::new(default_transcoder())
    }

    /// Inlines every resolvable reference of `document`.
    ///
    /// Per-asset problems are reported in the result. Only a blank document
    /// or an invalid `config` is an error.
    pub fn assemble(
        &self,
        document: &str,
        assets: &AssetSet,
        config: &BudgetConfig,
    ) -> Result<AssemblyResult, ValidationError> {
        if document.trim().is_empty() {
            return Err(ValidationError::for_field("document", "document is blank"));
        }
        config.validate()?;

        let references = scan_references(document);
        let groups = group_by_locator(&references);
        debug!(
            references = references.len(),
            locators = groups.len(),
            assets = assets.len(),
            "Scanned document"
        );

        let mut outcomes = Vec::with_capacity(groups.len());
        let mut failures = Vec::new();
        let mut replacements: Vec<(Range<usize>, String)> = Vec::new();
        let mut aggregate = 0usize;
        let mut budget_spent = false;

        for group in &groups {
            let locator = group.first.locator.as_str();
            let (class, basis) = classify(group.first);
            let mut outcome = AssetOutcome::pending(locator, class, basis, group.spans.len());

            let resolution = resolve(locator, assets);
            let Some(asset) = resolution.asset() else {
                warn!(locator, %class, "Unresolved asset reference");
                failures.push(AssemblyFailure::new(locator, AssemblyFailureReason::Unresolved));
                outcomes.push(outcome);
                continue;
            };
            outcome.matched_locator = Some(asset.locator.clone());
            outcome.match_rule = match resolution {
                Resolution::Fuzzy { rule, .. } => Some(rule),
                _ => None,
            };
            outcome.original_bytes = Some(asset.len());

            let remaining = config.total_bytes.saturating_sub(aggregate);
            if budget_spent {
                outcome.status = AssetStatus::SkippedForBudget;
                failures.push(AssemblyFailure::new(
                    locator,
                    AssemblyFailureReason::SkippedForBudget {
                        size_bytes: asset.len(),
                        remaining_bytes: remaining,
                    },
                ));
                outcomes.push(outcome);
                continue;
            }

            let media_type = asset.effective_media_type();
            let ladder = match compress_to_budget(self.transcoder.as_ref(), &asset.bytes, &media_type, class, config) {
                Ok(ladder) => ladder,
                Err(reason) => {
                    warn!(locator, %class, size = asset.len(), reason = ?reason, "Asset not embedded");
                    outcome.status = match reason {
                        AssemblyFailureReason::Transcode { .. } => AssetStatus::Failed,
                        _ => AssetStatus::Dropped,
                    };
                    failures.push(AssemblyFailure::new(locator, reason));
                    outcomes.push(outcome);
                    continue;
                }
            };

            let size = ladder.bytes.len();
            if size > remaining {
                info!(locator, size, remaining, "Aggregate budget spent");
                budget_spent = true;
                outcome.status = AssetStatus::SkippedForBudget;
                failures.push(AssemblyFailure::new(
                    locator,
                    AssemblyFailureReason::SkippedForBudget {
                        size_bytes: size,
                        remaining_bytes: remaining,
                    },
                ));
                outcomes.push(outcome);
                continue;
            }
            aggregate += size;

            let data_uri = format!("data:{};base64,{}", ladder.media_type, STANDARD.encode(&ladder.bytes));
            for span in &group.spans {
                replacements.push((span.clone(), data_uri.clone()));
            }

            info!(
                locator,
                %class,
                matched = %asset.locator,
                original = asset.len(),
                embedded = size,
                quality = ?ladder.quality,
                strategy = ?ladder.strategy,
                "Embedded asset"
            );
            outcome.status = AssetStatus::Embedded;
            outcome.embedded_bytes = Some(size);
            outcome.quality = ladder.quality;
            outcome.md5 = Some(hex::encode(Md5::digest(&ladder.bytes)));
            outcome.media_type = Some(ladder.media_type);
            outcome.strategy = Some(ladder.strategy);
            outcomes.push(outcome);
        }

        let substituted = apply_replacements(document, replacements);
        let document = if config.minify {
            minify_document(&substituted, &config.metadata_marker)
        } else {
            substituted
        };

        Ok(AssemblyResult {
            document,
            outcomes,
            aggregate_size: aggregate,
            total_budget: config.total_bytes,
            failures,
        })
    }
}

fn group_by_locator(references: &[AssetReference]) -> Vec<LocatorGroup<'_>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<LocatorGroup<'_>> = Vec::new();
    for reference in references {
        match index.get(reference.locator.as_str()) {
            Some(&at) => groups[at].spans.push(reference.span.clone()),
            None => {
                index.insert(reference.locator.as_str(), groups.len());
                groups.push(LocatorGroup {
                    first: reference,
                    spans: vec![reference.span.clone()],
                });
            }
        }
    }
    groups
}

fn apply_replacements(document: &str, mut replacements: Vec<(Range<usize>, String)>) -> String {
    replacements.sort_by_key(|(span, _)| span.start);
    let mut out = String::with_capacity(document.len());
    let mut cursor = 0;
    for (span, text) in replacements {
        if span.start < cursor {
            continue;
        }
        out.push_str(&document[cursor..span.start]);
        out.push_str(&text);
        cursor = span.end;
    }
    out.push_str(&document[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::asset::ProducedAsset;
    use crate::assembly::transcode::{MockImageTranscoder, PassthroughTranscoder, Transcoded};
    use pretty_assertions::assert_eq;

    const KB: usize = 1024;

    fn jpeg_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        bytes[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
        bytes
    }

    fn passthrough() -> ArtifactAssembler {
        ArtifactAssembler::new(Arc::new(PassthroughTranscoder))
    }

    fn unminified() -> BudgetConfig {
        BudgetConfig::default().with_minify(false)
    }

    #[test]
    fn test_hero_compressed_embedded_and_fully_replaced() {
        let mut transcoder = MockImageTranscoder::new();
        transcoder.expect_transcode().returning(|_, request| {
            let size = match request.quality {
                85 => 600 * KB,
                75 => 450 * KB,
                65 => 350 * KB,
                _ => 280 * KB,
            };
            Ok(Transcoded {
                bytes: jpeg_bytes(size),
                media_type: "image/jpeg".into(),
                quality: Some(request.quality),
                width: 1920,
                height: 1080,
            })
        });
        let assembler = ArtifactAssembler::new(Arc::new(transcoder));
        let document = r#"<header><img src="hero.jpg"></header><style>.a{background:url(hero.jpg)}</style>"#;
        let assets = AssetSet::new().with(ProducedAsset::new("hero.jpg", jpeg_bytes(900 * KB)));

        let result = assembler.assemble(document, &assets, &unminified()).unwrap();

        assert!(!result.document.contains("hero.jpg"));
        assert_eq!(result.document.matches("data:image/jpeg;base64,").count(), 2);
        let outcome = result.outcome("hero.jpg").unwrap();
        assert_eq!(outcome.status, AssetStatus::Embedded);
        assert_eq!(outcome.class, AssetClass::Hero);
        assert_eq!(outcome.embedded_bytes, Some(280 * KB));
        assert_eq!(outcome.quality, Some(55));
        assert_eq!(outcome.occurrences, 2);
        assert_eq!(outcome.strategy, Some(EmbedStrategy::Compressed));
        assert_eq!(outcome.md5.as_deref().map(str::len), Some(32));
        assert_eq!(result.aggregate_size, 280 * KB);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_unresolved_reference_left_untouched() {
        let document = r#"<nav><img src="icon-x.png" alt="x"></nav>"#;
        let assets = AssetSet::new()
            .with(ProducedAsset::new("hero.jpg", jpeg_bytes(4 * KB)))
            .with(ProducedAsset::new("logo.png", vec![1, 2, 3]));

        let result = passthrough().assemble(document, &assets, &unminified()).unwrap();

        assert_eq!(result.document, document);
        assert_eq!(
            result.failures,
            vec![AssemblyFailure::new("icon-x.png", AssemblyFailureReason::Unresolved)]
        );
        assert_eq!(result.outcome("icon-x.png").unwrap().status, AssetStatus::Unresolved);
        assert_eq!(result.aggregate_size, 0);
    }

    #[test]
    fn test_fuzzy_match_recorded() {
        let document = r#"<img src="./images/Hero.JPG">"#;
        let assets = AssetSet::new().with(ProducedAsset::new("banner_v2.jpg", jpeg_bytes(2 * KB)));

        let result = passthrough().assemble(document, &assets, &unminified()).unwrap();

        let outcome = result.outcome("./images/Hero.JPG").unwrap();
        assert_eq!(outcome.status, AssetStatus::Embedded);
        assert_eq!(outcome.matched_locator.as_deref(), Some("banner_v2.jpg"));
        assert_eq!(outcome.match_rule, Some(MatchRule::SynonymStem));
        assert_eq!(outcome.strategy, Some(EmbedStrategy::AsIs));
    }

    #[test]
    fn test_commented_reference_does_not_consume_budget() {
        let document = r#"<!-- old: <img src="hero-old.jpg"> --><img src="hero.jpg">"#;
        let assets = AssetSet::new()
            .with(ProducedAsset::new("hero-old.jpg", jpeg_bytes(150 * KB)))
            .with(ProducedAsset::new("hero.jpg", jpeg_bytes(150 * KB)));
        let config = BudgetConfig::default().with_total_bytes(200 * KB);

        let result = passthrough().assemble(document, &assets, &config).unwrap();

        assert!(result.outcome("hero-old.jpg").is_none());
        assert_eq!(result.outcome("hero.jpg").unwrap().status, AssetStatus::Embedded);
        assert_eq!(result.aggregate_size, 150 * KB);
        assert!(!result.document.contains("hero-old.jpg"));
        assert_eq!(result.document.matches("data:image/jpeg;base64,").count(), 1);
    }

    #[test]
    fn test_budget_invariant_and_skip_remaining() {
        let document = r#"<img src="hero-1.jpg"><img src="hero-2.jpg"><img src="hero-3.jpg"><img src="logo.png">"#;
        let assets: AssetSet = ["hero-1.jpg", "hero-2.jpg", "hero-3.jpg"]
            .into_iter()
            .map(|name| ProducedAsset::new(name, jpeg_bytes(190 * KB)))
            .chain(std::iter::once(ProducedAsset::new("logo.png", vec![9u8; 2 * KB])))
            .collect();
        let config = unminified().with_total_bytes(400 * KB);

        let result = passthrough().assemble(document, &assets, &config).unwrap();

        assert!(result.aggregate_size <= result.total_budget);
        assert_eq!(result.aggregate_size, 380 * KB);
        let statuses: Vec<_> = result.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![
                AssetStatus::Embedded,
                AssetStatus::Embedded,
                AssetStatus::SkippedForBudget,
                AssetStatus::SkippedForBudget,
            ]
        );
        assert!(result.document.contains(r#"src="hero-3.jpg""#));
        assert!(result.document.contains(r#"src="logo.png""#));
        for outcome in &result.outcomes {
            if let Some(embedded) = outcome.embedded_bytes {
                assert!(embedded <= config.budget_for(outcome.class).max_bytes);
            }
        }
    }

    #[test]
    fn test_oversized_asset_dropped_not_overflowed() {
        let mut transcoder = MockImageTranscoder::new();
        transcoder.expect_transcode().returning(|_, request| {
            Ok(Transcoded {
                bytes: jpeg_bytes(400 * KB),
                media_type: "image/jpeg".into(),
                quality: Some(request.quality),
                width: 1920,
                height: 1080,
            })
        });
        let assembler = ArtifactAssembler::new(Arc::new(transcoder));
        let document = r#"<img src="hero.jpg">"#;
        let assets = AssetSet::new().with(ProducedAsset::new("hero.jpg", jpeg_bytes(900 * KB)));

        let result = assembler.assemble(document, &assets, &unminified()).unwrap();

        assert_eq!(result.document, document);
        assert_eq!(result.outcome("hero.jpg").unwrap().status, AssetStatus::Dropped);
        assert_eq!(result.aggregate_size, 0);
        assert_eq!(result.failures.len(), 1);
    }

    #[test]
    fn test_assembly_is_idempotent() {
        let document = "<html>\n  <head>\n    <!-- genflow: v1 -->\n    <link rel=\"icon\" href=\"favicon.ico\">\n  </head>\n  <body>\n    <img src=\"logo.png\" width=\"48\">\n    <img src=\"icon-x.png\">\n  </body>\n</html>\n";
        let assets = AssetSet::new()
            .with(ProducedAsset::new("favicon.ico", vec![0, 0, 1, 0, 1, 2]))
            .with(ProducedAsset::new("logo.png", vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]));
        let config = BudgetConfig::default();
        let assembler = passthrough();

        let first = assembler.assemble(document, &assets, &config).unwrap();
        let second = assembler.assemble(document, &assets, &config).unwrap();
        assert_eq!(first, second);

        let again = assembler.assemble(&first.document, &assets, &config).unwrap();
        assert_eq!(again.document, first.document);
        assert!(first.document.starts_with("<html><head><!-- genflow: v1 -->"));
        assert!(first.document.contains("data:image/x-icon;base64,"));
    }

    #[test]
    fn test_blank_document_rejected() {
        let err = passthrough()
            .assemble("  \n ", &AssetSet::new(), &BudgetConfig::default())
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("document"));
    }

    #[test]
    fn test_invalid_budget_rejected() {
        let config = BudgetConfig::default().with_total_bytes(0);
        assert!(passthrough()
            .assemble("<p>x</p>", &AssetSet::new(), &config)
            .is_err());
    }
}
