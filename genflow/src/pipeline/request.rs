//! The immutable input of one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::utils::{generate_request_id, now_utc};

/// Input parameters of one generation run.
///
/// Parameters are fixed once the request is handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    id: Uuid,
    params: BTreeMap<String, Value>,
    created_at: DateTime<Utc>,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationRequest {
    /// Creates a request with a fresh time-ordered id and no parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: generate_request_id(),
            params: BTreeMap::new(),
            created_at: now_utc(),
        }
    }

    /// Creates a request from a parameter map.
    #[must_use]
    pub fn from_params(params: BTreeMap<String, Value>) -> Self {
        Self {
            params,
            ..Self::new()
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The request id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// All parameters.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// One parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_ids_are_v7() {
        let request = GenerationRequest::new();
        assert_eq!(request.id().get_version_num(), 7);
        assert_ne!(request.id(), GenerationRequest::new().id());
    }

    #[test]
    fn test_params() {
        let request = GenerationRequest::new()
            .with_param("keyword", "trail running shoes")
            .with_param("sections", 4);

        assert_eq!(request.param("keyword"), Some(&json!("trail running shoes")));
        assert_eq!(request.param("sections"), Some(&json!(4)));
        assert_eq!(request.params().len(), 2);
        assert!(request.param("missing").is_none());
    }
}
