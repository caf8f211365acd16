//! Matches document locators to produced assets.
//!
//! An exact locator match wins. Otherwise an ordered ladder of
//! progressively looser rules is tried; the first rule that finds a
//! candidate decides. Every fuzzy match is logged.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::info;

use super::asset::{AssetSet, ProducedAsset};
use super::scan::strip_query;

static GENERATED_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+|v\d+|\d+x|[0-9a-f]{8,}|final|copy|generated|img|image)$")
        .unwrap_or_else(|e| unreachable!("generated token pattern: {e}"))
});

/// Synonym groups; every member normalises to the first entry.
const SYNONYMS: &[&[&str]] = &[
    &["hero", "banner", "header", "masthead", "cover", "splash"],
    &["icon", "logo", "glyph", "symbol", "mark"],
    &["campaign", "promo", "promotion", "offer", "ad"],
    &["favicon", "siteicon", "tabicon"],
    &["background", "bg", "backdrop"],
    &["thumbnail", "thumb", "preview"],
    &["photo", "picture", "pic"],
];

/// One rung of the fuzzy ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Same path after stripping query, fragment, `./` and leading `/`.
    NormalizedPath,
    /// Same filename ignoring directories and case.
    CaseInsensitiveName,
    /// Same filename stem ignoring extension.
    StemIgnoringExtension,
    /// Same stem after dropping generated tokens and folding synonyms.
    SynonymStem,
}

impl MatchRule {
    /// The ladder, loosest last.
    pub const LADDER: [Self; 4] = [
        Self::NormalizedPath,
        Self::CaseInsensitiveName,
        Self::StemIgnoringExtension,
        Self::SynonymStem,
    ];

    /// Comparison key of `locator` under this rule.
    #[must_use]
    pub fn key(self, locator: &str) -> Option<String> {
        let path = normalize_path(locator);
        let key = match self {
            Self::NormalizedPath => path,
            Self::CaseInsensitiveName => file_name(&path).to_lowercase(),
            Self::StemIgnoringExtension => stem(&file_name(&path).to_lowercase()).to_string(),
            Self::SynonymStem => synonym_stem(stem(&file_name(&path).to_lowercase())),
        };
        (!key.is_empty()).then_some(key)
    }
}

/// Outcome of resolving one locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// The locator names an asset exactly.
    Exact(&'a ProducedAsset),
    /// A ladder rule found a candidate.
    Fuzzy {
        /// The matched asset.
        asset: &'a ProducedAsset,
        /// The rule that matched.
        rule: MatchRule,
    },
    /// Nothing matched.
    Unresolved,
}

impl<'a> Resolution<'a> {
    /// The matched asset, if any.
    #[must_use]
    pub fn asset(&self) -> Option<&'a ProducedAsset> {
        match *self {
            Self::Exact(asset) | Self::Fuzzy { asset, .. } => Some(asset),
            Self::Unresolved => None,
        }
    }
}

/// Resolves `locator` against `assets`.
#[must_use]
pub fn resolve<'a>(locator: &str, assets: &'a AssetSet) -> Resolution<'a> {
    if let Some(asset) = assets.get(locator) {
        return Resolution::Exact(asset);
    }

    for rule in MatchRule::LADDER {
        let Some(wanted) = rule.key(locator) else {
            continue;
        };
        let mut candidates = assets
            .iter()
            .filter(|asset| rule.key(&asset.locator).as_deref() == Some(wanted.as_str()));
        if let Some(asset) = candidates.next() {
            let others = candidates.count();
            info!(
                locator,
                matched = %asset.locator,
                rule = ?rule,
                other_candidates = others,
                "Fuzzy asset match"
            );
            return Resolution::Fuzzy { asset, rule };
        }
    }

    Resolution::Unresolved
}

fn normalize_path(locator: &str) -> String {
    let mut path = strip_query(locator.trim()).replace('\\', "/");
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    let mut trimmed = path.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn stem(file: &str) -> &str {
    file.rsplit_once('.').map_or(file, |(stem, _)| stem)
}

fn synonym_stem(stem: &str) -> String {
    stem.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty() && !GENERATED_TOKEN.is_match(token))
        .map(canonical_token)
        .collect::<Vec<_>>()
        .join("-")
}

fn canonical_token(token: &str) -> &str {
    SYNONYMS
        .iter()
        .find(|group| group.contains(&token))
        .map_or(token, |group| group[0])
}
