//! Top-level configuration.
//!
//! Every tunable of the retry engine, circuit breaker, result cache and
//! assembler lives here as a plain value. Durations are milliseconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::assembly::BudgetConfig;
use crate::cache::CacheConfig;
use crate::errors::{GenflowError, ValidationError};
use crate::resilience::{CircuitConfig, RetryConfig};

/// Configuration for one orchestrator and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenflowConfig {
    /// Retry and backoff tuning.
    pub retry: RetryConfig,
    /// Circuit breaker tuning.
    pub circuit: CircuitConfig,
    /// Result cache tuning.
    pub cache: CacheConfig,
    /// Whether stage results are cached at all.
    pub cache_enabled: bool,
    /// Per-class and aggregate embedding budgets.
    pub assembly: BudgetConfig,
    /// Whole-run deadline.
    pub run_deadline_ms: Option<u64>,
}

impl Default for GenflowConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
            cache: CacheConfig::default(),
            cache_enabled: true,
            assembly: BudgetConfig::default(),
            run_deadline_ms: None,
        }
    }
}

impl GenflowConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document. Missing sections use defaults.
    pub fn from_json_str(json: &str) -> Result<Self, GenflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the circuit configuration.
    #[must_use]
    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Sets the cache configuration.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Enables or disables result caching.
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the assembly budgets.
    #[must_use]
    pub fn with_assembly(mut self, assembly: BudgetConfig) -> Self {
        self.assembly = assembly;
        self
    }

    /// Sets the whole-run deadline.
    #[must_use]
    pub fn with_run_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.run_deadline_ms = Some(deadline_ms);
        self
    }

    /// The run deadline as a duration.
    #[must_use]
    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_ms.map(Duration::from_millis)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.retry.validate()?;
        self.circuit.validate()?;
        self.cache.validate()?;
        self.assembly.validate()?;
        if self.run_deadline_ms == Some(0) {
            return Err(ValidationError::for_field(
                "run_deadline_ms",
                "must be positive when set",
            ));
        }
        Ok(())
    }
}
