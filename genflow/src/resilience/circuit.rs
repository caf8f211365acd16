//! Per-key circuit breaker state.
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(cooldown)--> HalfOpen
//! HalfOpen --(success)--> Closed
//! HalfOpen --(failure)--> Open
//! ```

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::ValidationError;

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive retryable failures that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit rejects calls before admitting a probe.
    pub cooldown_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
        }
    }
}

impl CircuitConfig {
    /// Creates a circuit config with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub fn with_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.cooldown_ms = cooldown;
        self
    }

    /// Cooldown as a duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::for_field(
                "circuit.failure_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    #[default]
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One probe call decides whether to close again.
    HalfOpen,
}

/// Snapshot of one key's circuit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitState {
    /// Current phase.
    pub state: BreakerState,
    /// Consecutive retryable failures.
    pub failure_count: u32,
    /// When the circuit last opened.
    pub opened_at: Option<Instant>,
    /// Whether a half-open probe is currently running.
    pub probe_in_flight: bool,
    /// When the current probe was admitted.
    pub probe_started_at: Option<Instant>,
}

/// Admission decision for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The attempt may run. `probe` is set for the single half-open probe.
    Allowed {
        /// Whether this attempt is the half-open probe.
        probe: bool,
    },
    /// The attempt is rejected without running.
    Rejected {
        /// Time left until a probe is admitted.
        retry_after: Duration,
    },
}

/// Keyed circuit breakers sharing one configuration.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    config: CircuitConfig,
    circuits: DashMap<String, CircuitState>,
}

impl CircuitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// Returns the registry configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Decides whether an attempt for `key` may run at `now`.
    pub fn admit(&self, key: &str, now: Instant) -> Admission {
        let Some(mut circuit) = self.circuits.get_mut(key) else {
            return Admission::Allowed { probe: false };
        };

        match circuit.state {
            BreakerState::Closed => Admission::Allowed { probe: false },
            BreakerState::Open => {
                let cooldown = self.config.cooldown();
                let elapsed = circuit
                    .opened_at
                    .map_or(cooldown, |opened| now.saturating_duration_since(opened));
                if elapsed >= cooldown {
                    circuit.state = BreakerState::HalfOpen;
                    circuit.probe_in_flight = true;
                    circuit.probe_started_at = Some(now);
                    info!(key, "Circuit half-open, admitting probe");
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected {
                        retry_after: cooldown - elapsed,
                    }
                }
            }
            BreakerState::HalfOpen => {
                let cooldown = self.config.cooldown();
                let probing_for = circuit
                    .probe_started_at
                    .map_or(cooldown, |started| now.saturating_duration_since(started));
                if circuit.probe_in_flight && probing_for < cooldown {
                    return Admission::Rejected {
                        retry_after: cooldown - probing_for,
                    };
                }
                // A probe outstanding for a whole cooldown was dropped by its caller.
                if circuit.probe_in_flight {
                    warn!(key, "Half-open probe abandoned, admitting another");
                }
                circuit.probe_in_flight = true;
                circuit.probe_started_at = Some(now);
                Admission::Allowed { probe: true }
            }
        }
    }

    /// Records a successful attempt.
    ///
    /// A success reported while the circuit is open (a caller admitted
    /// before it tripped) leaves the open circuit untouched.
    pub fn record_success(&self, key: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(key) {
            match circuit.state {
                BreakerState::Open => {}
                BreakerState::HalfOpen => {
                    info!(key, "Circuit closed after successful probe");
                    *circuit = CircuitState::default();
                }
                BreakerState::Closed => {
                    circuit.failure_count = 0;
                }
            }
        }
    }

    /// Records a retryable failure. Returns true when the circuit is open afterwards.
    pub fn record_failure(&self, key: &str, now: Instant) -> bool {
        let mut circuit = self.circuits.entry(key.to_string()).or_default();
        circuit.failure_count = circuit.failure_count.saturating_add(1);

        match circuit.state {
            BreakerState::Closed if circuit.failure_count >= self.config.failure_threshold => {
                circuit.state = BreakerState::Open;
                circuit.opened_at = Some(now);
                warn!(
                    key,
                    failures = circuit.failure_count,
                    cooldown_ms = self.config.cooldown_ms,
                    "Circuit opened"
                );
            }
            BreakerState::HalfOpen => {
                circuit.state = BreakerState::Open;
                circuit.opened_at = Some(now);
                circuit.probe_in_flight = false;
                circuit.probe_started_at = None;
                warn!(key, "Half-open probe failed, circuit reopened");
            }
            _ => {}
        }

        circuit.state == BreakerState::Open
    }

    /// Frees the half-open probe slot without changing state.
    ///
    /// Used when a probe ends with a terminal error, which says nothing
    /// about the health of the dependency.
    pub fn release_probe(&self, key: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(key) {
            if circuit.state == BreakerState::HalfOpen {
                circuit.probe_in_flight = false;
                circuit.probe_started_at = None;
            }
        }
    }

    /// Returns the current state for `key` (closed if never seen).
    #[must_use]
    pub fn snapshot(&self, key: &str) -> CircuitState {
        self.circuits
            .get(key)
            .map(|circuit| circuit.clone())
            .unwrap_or_default()
    }

    /// Clears the state for `key`.
    pub fn reset(&self, key: &str) {
        if self.circuits.remove(key).is_some() {
            info!(key, "Circuit reset");
        }
    }
}
