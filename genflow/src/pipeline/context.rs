//! Stage contracts, contributions and the run context they merge into.

use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

use super::request::GenerationRequest;
use crate::assembly::{AssetSet, ProducedAsset};
use crate::cache::Fingerprint;
use crate::errors::ProviderError;

/// The fields a stage reads and writes.
///
/// Contracts are checked when the pipeline is built (every read is
/// satisfied by a seed key or an earlier write) and again for every
/// contribution (no undeclared writes, matching version).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageContract {
    /// Context fields the stage observes.
    pub reads: BTreeSet<String>,
    /// Context fields the stage may write.
    pub writes: BTreeSet<String>,
    /// Whether the stage contributes binary assets.
    pub produces_assets: bool,
    /// Whether the stage observes binary assets produced so far.
    pub reads_assets: bool,
    /// Version of the contribution shape.
    pub version: u32,
}

impl StageContract {
    /// Creates a version-1 contract with no reads or writes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: 1,
            ..Self::default()
        }
    }

    /// Declares read fields.
    #[must_use]
    pub fn reads<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Declares written fields.
    #[must_use]
    pub fn writes<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Declares that the stage produces assets.
    #[must_use]
    pub fn producing_assets(mut self) -> Self {
        self.produces_assets = true;
        self
    }

    /// Declares that the stage observes assets.
    #[must_use]
    pub fn reading_assets(mut self) -> Self {
        self.reads_assets = true;
        self
    }

    /// Sets the contribution version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Checks `contribution` from stage `stage` against this contract.
    ///
    /// Violations are terminal provider errors.
    pub fn check(&self, stage: &str, contribution: &Contribution) -> Result<(), ProviderError> {
        if contribution.stage != stage {
            return Err(ProviderError::contract_violation(format!(
                "contribution is labelled '{}'",
                contribution.stage
            )));
        }
        if contribution.version != self.version {
            return Err(ProviderError::contract_violation(format!(
                "contribution version {} does not match contract version {}",
                contribution.version, self.version
            )));
        }
        if let Some(key) = contribution.fields.keys().find(|key| !self.writes.contains(*key)) {
            return Err(ProviderError::contract_violation(format!(
                "undeclared write to '{key}'"
            )));
        }
        if !contribution.assets.is_empty() && !self.produces_assets {
            return Err(ProviderError::contract_violation(format!(
                "{} asset(s) produced without declaring produces_assets",
                contribution.assets.len()
            )));
        }
        Ok(())
    }
}

/// The flat, versioned output of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Name of the stage that produced it.
    pub stage: String,
    /// Shape version; must match the stage's contract.
    pub version: u32,
    /// Context fields to write.
    pub fields: BTreeMap<String, Value>,
    /// Binary assets to add.
    #[serde(skip)]
    pub assets: Vec<ProducedAsset>,
}

impl Contribution {
    /// Creates an empty contribution.
    #[must_use]
    pub fn new(stage: impl Into<String>, version: u32) -> Self {
        Self {
            stage: stage.into(),
            version,
            fields: BTreeMap::new(),
            assets: Vec::new(),
        }
    }

    /// Creates an empty contribution matching `contract`'s version.
    #[must_use]
    pub fn for_contract(stage: impl Into<String>, contract: &StageContract) -> Self {
        Self::new(stage, contract.version)
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds an asset.
    #[must_use]
    pub fn with_asset(mut self, asset: ProducedAsset) -> Self {
        self.assets.push(asset);
        self
    }

    /// Reads a field back.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Accumulated state of one run.
///
/// Owned by a single run; stages never see it directly, only a
/// [`StageView`] restricted to their declared reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageContext {
    fields: BTreeMap<String, Value>,
    assets: AssetSet,
    written_by: BTreeMap<String, String>,
}

impl StageContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Seeds an asset.
    #[must_use]
    pub fn with_asset(mut self, asset: ProducedAsset) -> Self {
        self.assets.insert(asset);
        self
    }

    /// Reads a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Field names, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Assets produced or seeded so far.
    #[must_use]
    pub fn assets(&self) -> &AssetSet {
        &self.assets
    }

    /// The stage that last wrote `key`; `None` for seeded or missing fields.
    #[must_use]
    pub fn written_by(&self, key: &str) -> Option<&str> {
        self.written_by.get(key).map(String::as_str)
    }

    /// Merges a validated contribution. Later writes win.
    ///
    /// Returns the keys whose previous value was replaced.
    pub fn merge(&mut self, contribution: Contribution) -> Vec<String> {
        let mut overwritten = Vec::new();
        for (key, value) in contribution.fields {
            if self.fields.insert(key.clone(), value).is_some() {
                debug!(
                    key = %key,
                    stage = %contribution.stage,
                    previous = ?self.written_by.get(&key),
                    "Context field overwritten"
                );
                overwritten.push(key.clone());
            }
            self.written_by.insert(key, contribution.stage.clone());
        }
        for asset in contribution.assets {
            self.assets.insert(asset);
        }
        overwritten
    }

    /// Builds the view `stage` is allowed to observe.
    #[must_use]
    pub fn view(&self, stage: &str, contract: &StageContract, request: &GenerationRequest) -> StageView {
        let fields: BTreeMap<String, Value> = contract
            .reads
            .iter()
            .filter_map(|key| self.fields.get(key).map(|value| (key.clone(), value.clone())))
            .collect();
        let assets = if contract.reads_assets {
            self.assets.clone()
        } else {
            AssetSet::new()
        };

        let asset_digests: Vec<Value> = assets
            .iter()
            .map(|asset| {
                json!({
                    "locator": asset.locator,
                    "md5": hex::encode(Md5::digest(&asset.bytes)),
                })
            })
            .collect();
        let fingerprint = Fingerprint::scoped(
            &format!("{stage}@v{}", contract.version),
            &json!({
                "params": request.params(),
                "fields": fields,
                "assets": asset_digests,
            }),
        );

        StageView {
            stage: stage.to_string(),
            request_id: request.id(),
            params: request.params().clone(),
            fields,
            assets,
            fingerprint,
        }
    }
}

/// What one stage observes: request parameters plus its declared reads.
#[derive(Debug, Clone, PartialEq)]
pub struct StageView {
    stage: String,
    request_id: Uuid,
    params: BTreeMap<String, Value>,
    fields: BTreeMap<String, Value>,
    assets: AssetSet,
    fingerprint: Fingerprint,
}

impl StageView {
    /// The observing stage.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// The run's request id.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// A request parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// A request parameter as a string.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    /// A declared context field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A declared context field as a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// A declared field that must be present.
    pub fn require(&self, key: &str) -> Result<&Value, ProviderError> {
        self.get(key).ok_or_else(|| {
            ProviderError::terminal(format!("stage '{}' requires field '{key}'", self.stage))
        })
    }

    /// Deserializes a required field.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> Result<T, ProviderError> {
        let value = self.require(key)?;
        serde_json::from_value(value.clone()).map_err(|e| {
            ProviderError::terminal(format!("field '{key}' has an unexpected shape: {e}"))
        })
    }

    /// All declared fields.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Assets visible to the stage.
    #[must_use]
    pub fn assets(&self) -> &AssetSet {
        &self.assets
    }

    /// Hash of everything that influences the stage's output.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}
