//! Resilience primitives: retry with exponential backoff and per-key
//! circuit breaking.
//!
//! Every stage call goes through a [`RetryEngine`]. Failures are classified
//! by [`ProviderError::is_retryable`](crate::errors::ProviderError::is_retryable);
//! retryable failures back off and count toward the key's circuit, terminal
//! failures stop immediately and leave the circuit alone.

mod backoff;
mod circuit;
mod engine;

pub use backoff::RetryConfig;
pub use circuit::{
    Admission, BreakerState, CircuitConfig, CircuitRegistry, CircuitState,
};
pub use engine::RetryEngine;
