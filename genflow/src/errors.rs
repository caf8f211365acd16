//! Error types for the genflow pipeline.
//!
//! The taxonomy separates input-level validation failures, provider failures
//! raised by stages, resilience outcomes produced by the retry engine,
//! non-fatal per-asset assembly failures, and the fatal pipeline error that
//! wraps the first unrecovered stage failure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The umbrella error type for genflow operations.
#[derive(Debug, Error)]
pub enum GenflowError {
    /// Input or configuration failed validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A pipeline could not be assembled from its stages.
    #[error("{0}")]
    PipelineValidation(#[from] PipelineValidationError),

    /// A pipeline run failed.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// A resilience-wrapped operation failed.
    #[error("{0}")]
    Retry(#[from] RetryError),

    /// A provider call failed.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Input-level error. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Validation failed{}: {message}", .field.as_ref().map(|f| format!(" for '{f}'")).unwrap_or_default())]
pub struct ValidationError {
    /// The error message.
    pub message: String,
    /// The offending field, if known.
    pub field: Option<String>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a validation error for a named field.
    #[must_use]
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// A transient failure (network blip, 5xx).
    Transient,
    /// The provider asked us to slow down.
    RateLimited,
    /// The attempt did not finish within its timeout.
    Timeout,
    /// The request itself is bad; retrying cannot help.
    Terminal,
    /// The stage returned output that breaks its declared contract.
    ContractViolation,
}

impl ProviderErrorKind {
    /// Returns true if a failure of this kind may be retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited | Self::Timeout)
    }
}

/// Error raised by a stage's external call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Provider error ({kind:?}): {message}")]
pub struct ProviderError {
    /// Failure classification.
    pub kind: ProviderErrorKind,
    /// Human readable message.
    pub message: String,
}

impl ProviderError {
    /// Creates a provider error of the given kind.
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a retryable transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, message)
    }

    /// Creates a retryable rate-limit error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    /// Creates a timeout error for an attempt that exceeded `after`.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ProviderErrorKind::Timeout,
            format!("attempt timed out after {}ms", after.as_millis()),
        )
    }

    /// Creates a terminal, never-retried error.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Terminal, message)
    }

    /// Creates a contract violation error.
    #[must_use]
    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::ContractViolation, message)
    }

    /// Returns true if the error may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(err: anyhow::Error) -> Self {
        Self::transient(format!("{err:#}"))
    }
}

/// Outcome of a resilience-wrapped operation that did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    /// The circuit for the key is open; the operation was not invoked.
    #[error("Circuit open for '{key}' (retry after {retry_after:?})")]
    CircuitOpen {
        /// The operation key.
        key: String,
        /// Time left until the circuit admits a probe.
        retry_after: Duration,
    },

    /// Every permitted attempt failed.
    #[error("Retries exhausted for '{key}' after {attempts} attempt(s): {last}")]
    Exhausted {
        /// The operation key.
        key: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last failure.
        last: ProviderError,
    },

    /// A terminal failure stopped the loop without retrying.
    #[error("Terminal failure for '{key}': {source}")]
    Terminal {
        /// The operation key.
        key: String,
        /// The terminal failure.
        source: ProviderError,
    },

    /// Cancellation suppressed further retries.
    #[error("Cancelled '{key}' after {attempts} attempt(s)")]
    Cancelled {
        /// The operation key.
        key: String,
        /// Number of attempts made.
        attempts: u32,
        /// The failure that would have been retried, if any.
        last: Option<ProviderError>,
    },
}

impl RetryError {
    /// Returns the operation key this error belongs to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::CircuitOpen { key, .. }
            | Self::Exhausted { key, .. }
            | Self::Terminal { key, .. }
            | Self::Cancelled { key, .. } => key,
        }
    }

    /// Returns a short machine-friendly type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "CircuitOpenError",
            Self::Exhausted { .. } => "RetryExhaustedError",
            Self::Terminal { .. } => "ProviderError",
            Self::Cancelled { .. } => "Cancelled",
        }
    }
}

/// Why a pipeline run stopped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineFailure {
    /// The stage's resilience-wrapped call failed.
    #[error(transparent)]
    Retry(#[from] RetryError),

    /// The stage's contribution broke its declared contract.
    #[error("Contract violation: {0}")]
    Contract(String),

    /// The run was cancelled externally.
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Cancellation reason.
        reason: String,
    },

    /// The whole-run deadline elapsed.
    #[error("Run deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded {
        /// The configured deadline.
        deadline_ms: u64,
    },

    /// The terminal assembly stage rejected its input.
    #[error("Assembly rejected input: {0}")]
    Assembly(#[from] ValidationError),

    /// A worker task panicked or was aborted.
    #[error("Internal failure: {0}")]
    Internal(String),
}

impl PipelineFailure {
    /// Returns a short machine-friendly type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Retry(err) => err.type_name(),
            Self::Contract(_) => "ContractViolation",
            Self::Cancelled { .. } => "Cancelled",
            Self::DeadlineExceeded { .. } => "DeadlineExceeded",
            Self::Assembly(_) => "ValidationError",
            Self::Internal(_) => "InternalError",
        }
    }
}

/// The first fatal stage failure of a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage '{stage}' failed: {cause}")]
pub struct PipelineError {
    /// The stage that failed.
    pub stage: String,
    /// The root cause.
    pub cause: PipelineFailure,
}

impl PipelineError {
    /// Creates a new pipeline error.
    #[must_use]
    pub fn new(stage: impl Into<String>, cause: impl Into<PipelineFailure>) -> Self {
        Self {
            stage: stage.into(),
            cause: cause.into(),
        }
    }

    /// Returns true if the run ended through cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.cause, PipelineFailure::Cancelled { .. })
    }
}

/// Why a single asset was not embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AssemblyFailureReason {
    /// No produced asset matched the reference.
    Unresolved,
    /// The best compressed result still exceeded the class maximum.
    OverClassBudget {
        /// Smallest size reached.
        best_bytes: usize,
        /// The class maximum.
        max_bytes: usize,
    },
    /// The aggregate budget was already spent.
    SkippedForBudget {
        /// Size the asset would have added.
        size_bytes: usize,
        /// Budget left when the asset was reached.
        remaining_bytes: usize,
    },
    /// The asset bytes could not be decoded or re-encoded.
    Transcode {
        /// Decoder/encoder message.
        message: String,
    },
}

/// Non-fatal, per-asset assembly failure.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Asset '{locator}' not embedded: {reason:?}")]
pub struct AssemblyFailure {
    /// The locator as written in the document.
    pub locator: String,
    /// Why it was not embedded.
    pub reason: AssemblyFailureReason,
}

impl AssemblyFailure {
    /// Creates a new assembly failure.
    #[must_use]
    pub fn new(locator: impl Into<String>, reason: AssemblyFailureReason) -> Self {
        Self {
            locator: locator.into(),
            reason,
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-002-UNSATISFIED_READ").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline cannot be built from its stages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-001-DUPLICATE" => Some(
                "Stage names double as retry keys and must be unique. \
                 Rename one of the stages.",
            ),
            "CONTRACT-002-UNSATISFIED_READ" => Some(
                "Declare the field as a seed key of the initial context, or move \
                 the stage after the stage that writes it.",
            ),
            "CONTRACT-003-EMPTY" => Some("Add at least one stage to the pipeline before building."),
            "CONTRACT-004-DOCUMENT_SOURCE" => Some(
                "Some stage must write the document field consumed by the assembler.",
            ),
            _ => None,
        }
    }
}
