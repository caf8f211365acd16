//! The stage trait and a closure adapter.

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use super::context::{Contribution, StageContract, StageView};
use crate::errors::ProviderError;

/// One unit of pipeline work backed by an external provider.
///
/// The stage name doubles as the retry/circuit key, so two stages calling
/// the same provider endpoint with different names get separate breakers.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Unique name within the pipeline.
    fn name(&self) -> &str;

    /// Declared reads and writes.
    fn contract(&self) -> StageContract;

    /// Whether results may be served from the result cache.
    fn cacheable(&self) -> bool {
        false
    }

    /// Cache TTL; `None` uses the cache's default.
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }

    /// Attempt limit; `None` uses the engine's default.
    fn max_attempts(&self) -> Option<u32> {
        None
    }

    /// Produces this stage's contribution.
    async fn generate(&self, view: &StageView) -> Result<Contribution, ProviderError>;
}

/// A stage backed by an async closure.
pub struct FnStage<F, Fut> {
    name: String,
    contract: StageContract,
    cacheable: bool,
    cache_ttl: Option<Duration>,
    max_attempts: Option<u32>,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnStage<F, Fut>
where
    F: Fn(StageView) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Contribution, ProviderError>> + Send,
{
    /// Creates a closure-backed stage.
    pub fn new(name: impl Into<String>, contract: StageContract, func: F) -> Self {
        Self {
            name: name.into(),
            contract,
            cacheable: false,
            cache_ttl: None,
            max_attempts: None,
            func,
            _phantom: PhantomData,
        }
    }

    /// Allows caching with the given TTL (`None` for the cache default).
    #[must_use]
    pub fn cached(mut self, ttl: Option<Duration>) -> Self {
        self.cacheable = true;
        self.cache_ttl = ttl;
        self
    }

    /// Overrides the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

impl<F, Fut> Debug for FnStage<F, Fut> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F, Fut>
where
    F: Fn(StageView) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Contribution, ProviderError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> StageContract {
        self.contract.clone()
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    async fn generate(&self, view: &StageView) -> Result<Contribution, ProviderError> {
        (self.func)(view.clone()).await
    }
}
