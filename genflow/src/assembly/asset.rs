//! Binary assets produced by stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::transcode::{media_type_for_extension, sniff_magic};

/// A binary asset produced during a run (typically a generated image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedAsset {
    /// Name the document is expected to reference it by.
    pub locator: String,
    /// Declared media type, if the producer knows it.
    pub media_type: Option<String>,
    /// Raw bytes. Not serialized.
    #[serde(skip, default = "no_bytes")]
    pub bytes: Arc<[u8]>,
}

fn no_bytes() -> Arc<[u8]> {
    Arc::from(Vec::new())
}

impl ProducedAsset {
    /// Creates an asset with an unknown media type.
    #[must_use]
    pub fn new(locator: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            locator: locator.into(),
            media_type: None,
            bytes: bytes.into(),
        }
    }

    /// Sets the media type.
    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the asset has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Media type from magic bytes, then the declared type, then the extension.
    #[must_use]
    pub fn effective_media_type(&self) -> String {
        sniff_magic(&self.bytes)
            .map(str::to_string)
            .or_else(|| self.media_type.clone())
            .or_else(|| media_type_for_extension(&self.locator).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }
}

/// Produced assets indexed by locator.
///
/// Iteration is sorted by locator so resolution is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetSet {
    by_locator: BTreeMap<String, ProducedAsset>,
}

impl AssetSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an asset; a later asset with the same locator replaces the earlier one.
    pub fn insert(&mut self, asset: ProducedAsset) {
        self.by_locator.insert(asset.locator.clone(), asset);
    }

    /// Adds an asset, builder style.
    #[must_use]
    pub fn with(mut self, asset: ProducedAsset) -> Self {
        self.insert(asset);
        self
    }

    /// Exact lookup.
    #[must_use]
    pub fn get(&self, locator: &str) -> Option<&ProducedAsset> {
        self.by_locator.get(locator)
    }

    /// Assets in locator order.
    pub fn iter(&self) -> impl Iterator<Item = &ProducedAsset> {
        self.by_locator.values()
    }

    /// Number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_locator.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_locator.is_empty()
    }
}

impl FromIterator<ProducedAsset> for AssetSet {
    fn from_iter<I: IntoIterator<Item = ProducedAsset>>(iter: I) -> Self {
        let mut set = Self::new();
        for asset in iter {
            set.insert(asset);
        }
        set
    }
}
