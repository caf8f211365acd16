//! The retry engine: backoff-driven attempts guarded by per-key circuits.

use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backoff::RetryConfig;
use super::circuit::{Admission, CircuitConfig, CircuitRegistry, CircuitState};
use crate::cancellation::CancellationToken;
use crate::errors::{ProviderError, RetryError};

/// Runs operations with retries, backoff and per-key circuit breaking.
///
/// One engine owns the circuit state of every key it has seen. Share it
/// across runs with `Arc<RetryEngine>` so breakers persist.
#[derive(Debug, Default)]
pub struct RetryEngine {
    config: RetryConfig,
    circuits: CircuitRegistry,
}

impl RetryEngine {
    /// Creates an engine from retry and circuit configuration.
    #[must_use]
    pub fn new(config: RetryConfig, circuit: CircuitConfig) -> Self {
        Self {
            config,
            circuits: CircuitRegistry::new(circuit),
        }
    }

    /// Returns the retry configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the current circuit state for `key`.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> CircuitState {
        self.circuits.snapshot(key)
    }

    /// Clears the circuit for `key`.
    pub fn reset(&self, key: &str) {
        self.circuits.reset(key);
    }

    /// Executes `operation` under `key` with up to `max_attempts` attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        key: &str,
        max_attempts: u32,
        operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute_with_cancel(key, max_attempts, None, operation)
            .await
    }

    /// Executes `operation` like [`RetryEngine::execute`], honouring `cancel`
    /// between attempts.
    ///
    /// An attempt that has started always runs to completion; cancellation
    /// only suppresses the next one.
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        key: &str,
        max_attempts: u32,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempts = 0u32;
        let mut last_error: Option<ProviderError> = None;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(RetryError::Cancelled {
                    key: key.to_string(),
                    attempts,
                    last: last_error,
                });
            }

            if let Admission::Rejected { retry_after } = self.circuits.admit(key, Instant::now()) {
                debug!(key, retry_after_ms = retry_after.as_millis() as u64, "Circuit open, failing fast");
                return Err(RetryError::CircuitOpen {
                    key: key.to_string(),
                    retry_after,
                });
            }

            attempts += 1;
            let outcome = match self.config.attempt_timeout() {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::timeout(limit)),
                },
                None => operation().await,
            };

            let error = match outcome {
                Ok(value) => {
                    self.circuits.record_success(key);
                    if attempts > 1 {
                        debug!(key, attempts, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                self.circuits.release_probe(key);
                warn!(key, attempt = attempts, error = %error, "Terminal failure, not retrying");
                return Err(RetryError::Terminal {
                    key: key.to_string(),
                    source: error,
                });
            }

            let circuit_open = self.circuits.record_failure(key, Instant::now());
            if circuit_open || attempts >= max_attempts {
                warn!(
                    key,
                    attempts,
                    circuit_open,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    key: key.to_string(),
                    attempts,
                    last: error,
                });
            }

            let delay = self.config.jittered_delay(attempts);
            debug!(
                key,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after error"
            );
            last_error = Some(error);

            match cancel {
                Some(token) => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = token.cancelled() => {
                            return Err(RetryError::Cancelled {
                                key: key.to_string(),
                                attempts,
                                last: last_error,
                            });
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
