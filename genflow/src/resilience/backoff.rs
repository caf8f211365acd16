//! Retry configuration and exponential backoff with symmetric jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ValidationError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per call (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_base: f64,
    /// Symmetric jitter as a fraction of the computed delay.
    pub jitter_ratio: f64,
    /// Optional per-attempt timeout in milliseconds.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_base: 2.0,
            jitter_ratio: 0.1,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the exponential growth factor.
    #[must_use]
    pub fn with_backoff_base(mut self, base: f64) -> Self {
        self.backoff_base = base;
        self
    }

    /// Sets the jitter ratio. Zero disables jitter.
    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout_ms(mut self, timeout: u64) -> Self {
        self.attempt_timeout_ms = Some(timeout);
        self
    }

    /// Per-attempt timeout as a duration.
    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::for_field(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ValidationError::for_field(
                "retry.max_delay_ms",
                "must not be lower than base_delay_ms",
            ));
        }
        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            return Err(ValidationError::for_field(
                "retry.backoff_base",
                "must be a finite number >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ValidationError::for_field(
                "retry.jitter_ratio",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(ValidationError::for_field(
                "retry.attempt_timeout_ms",
                "must be positive when set",
            ));
        }
        Ok(())
    }

    /// Delay before retrying after failed attempt `attempt` (1-based), without jitter.
    ///
    /// `min(max_delay, base_delay * backoff_base^(attempt - 1))`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_base.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay for `attempt` with symmetric jitter applied, clamped to `max_delay_ms`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        apply_jitter(
            self.backoff_delay(attempt),
            self.jitter_ratio,
            self.max_delay_ms,
            &mut rand::thread_rng(),
        )
    }
}

fn apply_jitter<R: Rng + ?Sized>(
    delay: Duration,
    ratio: f64,
    max_delay_ms: u64,
    rng: &mut R,
) -> Duration {
    let delay_ms = delay.as_millis() as f64;
    if ratio <= 0.0 || delay_ms == 0.0 {
        return delay;
    }
    let factor = rng.gen_range(-ratio..=ratio);
    let jittered = (delay_ms * (1.0 + factor)).clamp(0.0, max_delay_ms as f64);
    Duration::from_millis(jittered as u64)
}
