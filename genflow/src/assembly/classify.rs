//! Assigns an [`AssetClass`] to each reference.
//!
//! Filename keywords win; explicit `width`/`height` hints on the enclosing
//! tag are consulted only when the filename says nothing.

use serde::{Deserialize, Serialize};

use super::budget::AssetClass;
use super::scan::{extension_of, strip_query, AssetReference};

/// Edge length at or below which a hinted image counts as an icon.
pub const ICON_MAX_EDGE: u32 = 64;
/// Edge length at or above which a hinted image counts as a hero.
pub const HERO_MIN_EDGE: u32 = 1200;

const FILENAME_RULES: &[(AssetClass, &[&str])] = &[
    (AssetClass::Favicon, &["favicon", "apple-touch-icon", "touch-icon"]),
    (AssetClass::Icon, &["icon", "logo", "badge", "avatar", "glyph"]),
    (AssetClass::Hero, &["hero", "banner", "masthead", "cover", "header"]),
    (AssetClass::Campaign, &["campaign", "promo", "promotion", "offer", "sale"]),
];

/// What decided the class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum ClassificationBasis {
    /// A filename keyword matched.
    Filename {
        /// The keyword.
        keyword: String,
    },
    /// The enclosing tag declared dimensions.
    SizeHint {
        /// Longest declared edge.
        longest_edge: u32,
    },
    /// Nothing matched.
    Fallback,
}

/// Classifies one reference.
#[must_use]
pub fn classify(reference: &AssetReference) -> (AssetClass, ClassificationBasis) {
    if let Some(found) = classify_by_filename(&reference.locator) {
        return found;
    }

    if let Some(edge) = reference.size_hint.and_then(|hint| hint.longest_edge()) {
        if edge <= ICON_MAX_EDGE {
            return (AssetClass::Icon, ClassificationBasis::SizeHint { longest_edge: edge });
        }
        if edge >= HERO_MIN_EDGE {
            return (AssetClass::Hero, ClassificationBasis::SizeHint { longest_edge: edge });
        }
    }

    (AssetClass::Default, ClassificationBasis::Fallback)
}

fn classify_by_filename(locator: &str) -> Option<(AssetClass, ClassificationBasis)> {
    let path = strip_query(locator).to_ascii_lowercase();
    let file = path.rsplit('/').next().unwrap_or(&path);

    if extension_of(file) == Some("ico") {
        return Some((
            AssetClass::Favicon,
            ClassificationBasis::Filename {
                keyword: ".ico".to_string(),
            },
        ));
    }

    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    for (class, keywords) in FILENAME_RULES {
        for keyword in *keywords {
            let matched = if keyword.contains('-') {
                stem.contains(keyword)
            } else {
                stem.split(|c: char| !c.is_ascii_alphanumeric())
                    .any(|token| token.starts_with(keyword))
            };
            if matched {
                return Some((
                    *class,
                    ClassificationBasis::Filename {
                        keyword: (*keyword).to_string(),
                    },
                ));
            }
        }
    }
    None
}
