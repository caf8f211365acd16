//! Mock stages and observers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::assembly::ProducedAsset;
use crate::errors::ProviderError;
use crate::pipeline::{Contribution, ProgressObserver, ProgressUpdate, Stage, StageContract, StageView};

/// A stage that always returns the same contribution.
///
/// Declared writes and `produces_assets` follow the configured fields and
/// assets, so call [`StaticStage::with_contract`] first when combining both.
#[derive(Debug)]
pub struct StaticStage {
    name: String,
    contract: StageContract,
    fields: BTreeMap<String, Value>,
    assets: Vec<ProducedAsset>,
    cacheable: bool,
    max_attempts: Option<u32>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<BTreeMap<String, Value>>>,
}

impl StaticStage {
    /// Creates a stage with an empty version-1 contract.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: StageContract::new(),
            fields: BTreeMap::new(),
            assets: Vec::new(),
            cacheable: false,
            max_attempts: None,
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the contract.
    #[must_use]
    pub fn with_contract(mut self, contract: StageContract) -> Self {
        self.contract = contract;
        self
    }

    /// Declares reads.
    #[must_use]
    pub fn reading<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contract = self.contract.reads(keys);
        self
    }

    /// Writes `key` on every call.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        self.contract = self.contract.writes([key.clone()]);
        self.fields.insert(key, value.into());
        self
    }

    /// Produces `asset` on every call.
    #[must_use]
    pub fn with_asset(mut self, asset: ProducedAsset) -> Self {
        self.contract = self.contract.producing_assets();
        self.assets.push(asset);
        self
    }

    /// Marks the stage cacheable with the cache's default TTL.
    #[must_use]
    pub fn cached(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Overrides the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sleeps for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `generate` calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fields observed on each call.
    #[must_use]
    pub fn seen_fields(&self) -> Vec<BTreeMap<String, Value>> {
        self.seen.lock().clone()
    }

    fn contribution(&self) -> Contribution {
        let mut contribution = Contribution::for_contract(&self.name, &self.contract);
        contribution.fields = self.fields.clone();
        contribution.assets = self.assets.clone();
        contribution
    }
}

#[async_trait]
impl Stage for StaticStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> StageContract {
        self.contract.clone()
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    async fn generate(&self, view: &StageView) -> Result<Contribution, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(view.fields().clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.contribution())
    }
}

/// A stage that fails according to a script, then behaves like its inner stage.
#[derive(Debug)]
pub struct ScriptedStage {
    inner: StaticStage,
    script: Mutex<VecDeque<ProviderError>>,
    attempts: AtomicUsize,
}

impl ScriptedStage {
    /// Wraps `inner` with an empty script.
    #[must_use]
    pub fn new(inner: StaticStage) -> Self {
        Self {
            inner,
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fails the next `times` calls with `error`.
    #[must_use]
    pub fn failing_first(self, times: usize, error: ProviderError) -> Self {
        self.script
            .lock()
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Queues one more failure.
    pub fn push_failure(&self, error: ProviderError) {
        self.script.lock().push_back(error);
    }

    /// Number of attempts, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Failures still queued.
    #[must_use]
    pub fn remaining_failures(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn contract(&self) -> StageContract {
        self.inner.contract()
    }

    fn cacheable(&self) -> bool {
        self.inner.cacheable()
    }

    fn max_attempts(&self) -> Option<u32> {
        self.inner.max_attempts()
    }

    async fn generate(&self, view: &StageView) -> Result<Contribution, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(error) => Err(error),
            None => self.inner.generate(view).await,
        }
    }
}

/// A stage that always fails with the same error.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    contract: StageContract,
    error: ProviderError,
    calls: AtomicUsize,
}

impl FailingStage {
    /// Creates a failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: ProviderError) -> Self {
        Self {
            name: name.into(),
            contract: StageContract::new(),
            error,
            calls: AtomicUsize::new(0),
        }
    }

    /// Replaces the contract.
    #[must_use]
    pub fn with_contract(mut self, contract: StageContract) -> Self {
        self.contract = contract;
        self
    }

    /// Number of `generate` calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> StageContract {
        self.contract.clone()
    }

    async fn generate(&self, _view: &StageView) -> Result<Contribution, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Records every progress update.
#[derive(Debug, Default)]
pub struct ProgressRecorder {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl ProgressRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates in arrival order.
    #[must_use]
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().clone()
    }

    /// Percentages in arrival order.
    #[must_use]
    pub fn percentages(&self) -> Vec<u8> {
        self.updates.lock().iter().map(|u| u.percentage).collect()
    }
}

impl ProgressObserver for ProgressRecorder {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.updates.lock().push(update.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderErrorKind;
    use crate::pipeline::{GenerationRequest, StageContext};

    fn view_for(stage: &dyn Stage) -> StageView {
        StageContext::new()
            .with_field("keyword", "shoes")
            .view(stage.name(), &stage.contract(), &GenerationRequest::new())
    }

    #[tokio::test]
    async fn test_static_stage_declares_what_it_writes() {
        let stage = StaticStage::new("outline")
            .reading(["keyword"])
            .with_field("outline", serde_json::json!(["intro"]))
            .with_asset(ProducedAsset::new("hero.jpg", vec![1]));
        let contract = stage.contract();

        let contribution = stage.generate(&view_for(&stage)).await.unwrap();

        assert!(contract.check("outline", &contribution).is_ok());
        assert!(contract.produces_assets);
        assert_eq!(stage.call_count(), 1);
        assert_eq!(stage.seen_fields()[0].get("keyword"), Some(&serde_json::json!("shoes")));
    }

    #[tokio::test]
    async fn test_scripted_stage_fails_then_succeeds() {
        let stage = ScriptedStage::new(StaticStage::new("copy").with_field("document", "<p>x</p>"))
            .failing_first(2, ProviderError::transient("blip"));
        let view = view_for(&stage);

        assert_eq!(stage.generate(&view).await.unwrap_err().kind, ProviderErrorKind::Transient);
        assert!(stage.generate(&view).await.is_err());
        assert!(stage.generate(&view).await.is_ok());
        assert_eq!(stage.attempts(), 3);
        assert_eq!(stage.remaining_failures(), 0);
    }

    #[tokio::test]
    async fn test_failing_stage_counts_calls() {
        let stage = FailingStage::new("images", ProviderError::terminal("bad prompt"));
        let view = view_for(&stage);
        assert!(stage.generate(&view).await.is_err());
        assert!(stage.generate(&view).await.is_err());
        assert_eq!(stage.call_count(), 2);
    }
}
