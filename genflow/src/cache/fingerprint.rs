//! Canonical content fingerprints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 over the canonical JSON form of a value.
///
/// Object keys are sorted recursively before hashing, so two values that
/// differ only in key order share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints a JSON value.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        Self::digest(&[], value)
    }

    /// Fingerprints a value scoped to a namespace (for example a stage name
    /// and contract version), so identical inputs to different producers
    /// never collide.
    #[must_use]
    pub fn scoped(namespace: &str, value: &Value) -> Self {
        Self::digest(namespace.as_bytes(), value)
    }

    fn digest(namespace: &[u8], value: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(namespace);
        hasher.update([0u8]);
        hasher.update(canonical_json(value).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializes `value` with object keys sorted at every depth.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"keyword": "rust", "tone": {"voice": "calm", "length": 3}});
        let b = json!({"tone": {"length": 3, "voice": "calm"}, "keyword": "rust"});

        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_values_change_fingerprint() {
        let a = json!({"keyword": "rust"});
        let b = json!({"keyword": "go"});

        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            Fingerprint::of(&json!([1, 2])),
            Fingerprint::of(&json!([2, 1]))
        );
    }

    #[test]
    fn test_namespace_scopes_digest() {
        let input = json!({"keyword": "rust"});
        assert_ne!(
            Fingerprint::scoped("outline@1", &input),
            Fingerprint::scoped("outline@2", &input)
        );
        assert_eq!(
            Fingerprint::scoped("outline@1", &input),
            Fingerprint::scoped("outline@1", &input)
        );
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let fingerprint = Fingerprint::of(&json!(null));
        assert_eq!(fingerprint.as_str().len(), 64);
        assert!(fingerprint.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": [{"d": 1, "c": 2}], "a": true});
        assert_eq!(canonical_json(&value), r#"{"a":true,"b":[{"c":2,"d":1}]}"#);
    }
}
