//! Finds asset references in a markup document.
//!
//! A reference is an attribute value (`src`, `href`, `poster`, `data-src`,
//! `content`, or a `srcset` candidate) or a stylesheet `url()` whose target
//! is a local binary asset. Remote URLs, `data:` URIs and fragments are
//! not references, and nothing inside a `<!-- -->` comment is.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use super::minify::COMMENT;

/// Extensions treated as embeddable binary assets.
pub const ASSET_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico"];

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(data-src|src|href|poster|content)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .unwrap_or_else(|e| unreachable!("attribute pattern: {e}"))
});

static SRCSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bsrcset\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .unwrap_or_else(|e| unreachable!("srcset pattern: {e}"))
});

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]+))\s*\)"#)
        .unwrap_or_else(|e| unreachable!("url pattern: {e}"))
});

static DIMENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(width|height)\s*=\s*["']?(\d+)"#)
        .unwrap_or_else(|e| unreachable!("dimension pattern: {e}"))
});

/// Where a reference was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceKind {
    /// An attribute value; `attribute` is the lowercase attribute name.
    Attribute {
        /// Attribute name.
        attribute: String,
    },
    /// One candidate of a `srcset` list.
    SrcsetCandidate,
    /// A stylesheet `url()`.
    StyleUrl,
}

/// Explicit `width`/`height` of the tag enclosing a reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeHint {
    /// Declared width in pixels.
    pub width: Option<u32>,
    /// Declared height in pixels.
    pub height: Option<u32>,
}

impl SizeHint {
    /// The larger declared edge.
    #[must_use]
    pub fn longest_edge(&self) -> Option<u32> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(w.max(h)),
            (w, h) => w.or(h),
        }
    }
}

/// One asset reference with its exact byte span in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    /// The locator text exactly as written.
    pub locator: String,
    /// Byte range of the locator in the document.
    pub span: Range<usize>,
    /// Where it was found.
    pub kind: ReferenceKind,
    /// Dimensions declared on the enclosing tag.
    pub size_hint: Option<SizeHint>,
}

/// Returns every asset reference in document order.
#[must_use]
pub fn scan_references(document: &str) -> Vec<AssetReference> {
    let mut found: BTreeMap<usize, AssetReference> = BTreeMap::new();

    for caps in ATTRIBUTE.captures_iter(document) {
        let Some(value) = caps.get(2).or_else(|| caps.get(3)) else {
            continue;
        };
        let attribute = caps
            .get(1)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_default();
        push_reference(
            &mut found,
            document,
            value.range(),
            ReferenceKind::Attribute { attribute },
        );
    }

    for caps in SRCSET.captures_iter(document) {
        let Some(value) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        for candidate in srcset_candidates(value.as_str(), value.start()) {
            push_reference(&mut found, document, candidate, ReferenceKind::SrcsetCandidate);
        }
    }

    for caps in CSS_URL.captures_iter(document) {
        let Some(value) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        push_reference(&mut found, document, value.range(), ReferenceKind::StyleUrl);
    }

    let comments: Vec<Range<usize>> = COMMENT.find_iter(document).map(|m| m.range()).collect();
    found
        .into_values()
        .filter(|reference| !inside_comment(&comments, reference.span.start))
        .collect()
}

/// `comments` is sorted and non-overlapping.
fn inside_comment(comments: &[Range<usize>], offset: usize) -> bool {
    let idx = comments.partition_point(|comment| comment.end <= offset);
    comments.get(idx).is_some_and(|comment| comment.start <= offset)
}

fn push_reference(
    found: &mut BTreeMap<usize, AssetReference>,
    document: &str,
    span: Range<usize>,
    kind: ReferenceKind,
) {
    let locator = &document[span.clone()];
    if !is_asset_locator(locator) {
        return;
    }
    let size_hint = enclosing_tag(document, span.start).and_then(size_hint_of);
    found.entry(span.start).or_insert_with(|| AssetReference {
        locator: locator.to_string(),
        span,
        kind,
        size_hint,
    });
}

/// Byte ranges of the URL part of each `srcset` candidate.
fn srcset_candidates(value: &str, offset: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut cursor = 0;
    for part in value.split(',') {
        let leading = part.len() - part.trim_start().len();
        let url_len = part
            .trim_start()
            .find(char::is_whitespace)
            .unwrap_or_else(|| part.trim_start().len());
        if url_len > 0 {
            let start = offset + cursor + leading;
            ranges.push(start..start + url_len);
        }
        cursor += part.len() + 1;
    }
    ranges
}

/// Returns true if `locator` points at a local binary asset.
#[must_use]
pub fn is_asset_locator(locator: &str) -> bool {
    let trimmed = locator.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
        return false;
    }
    let lower = trimmed.to_ascii_lowercase();
    if ["data:", "http://", "https://", "mailto:", "javascript:", "tel:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return false;
    }
    extension_of(&lower).is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext))
}

/// Lowercase-insensitive extension of the path part of a locator.
#[must_use]
pub fn extension_of(locator: &str) -> Option<&str> {
    let path = strip_query(locator);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty()).then_some(ext)
}

/// Drops any `?query` or `#fragment` suffix.
#[must_use]
pub fn strip_query(locator: &str) -> &str {
    locator
        .find(['?', '#'])
        .map_or(locator, |idx| &locator[..idx])
}

/// Text of the tag containing byte `position`, if it is inside one.
fn enclosing_tag(document: &str, position: usize) -> Option<&str> {
    let before = &document[..position];
    let open = before.rfind('<')?;
    if before[open..].contains('>') {
        return None;
    }
    let close = document[position..].find('>').map(|i| position + i)?;
    Some(&document[open..=close])
}

fn size_hint_of(tag: &str) -> Option<SizeHint> {
    let mut hint = SizeHint::default();
    for caps in DIMENSION.captures_iter(tag) {
        let value = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
            Some("width") => hint.width = hint.width.or(value),
            Some("height") => hint.height = hint.height.or(value),
            _ => {}
        }
    }
    (hint.width.is_some() || hint.height.is_some()).then_some(hint)
}
