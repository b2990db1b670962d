//! Error taxonomy shared across the pipeline.
//!
//! `CallError` classifies failures of the injected remote call; the retry
//! policy keys off this classification. `PipelineError` is the terminal error
//! a caller of the pipeline can observe. Cache and telemetry have no error
//! types of their own: their failure mode is degradation (a miss, a dropped
//! metric), never a failed request.

use std::time::Duration;

/// Classified failure of a single remote LLM call.
///
/// Variants are `Clone` so the last error of a retry sequence can be
/// preserved verbatim in the terminal error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CallError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Network-level failures, timeouts, connection resets, server errors
    /// (5xx), rate limiting (429) and unclassified errors are transient.
    /// Everything else (other 4xx, malformed requests) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Network(_)
            | CallError::Timeout(_)
            | CallError::ConnectionReset(_)
            | CallError::Unknown(_) => true,
            CallError::Http { status, .. } => *status >= 500 || *status == 429,
            CallError::InvalidRequest(_) => false,
        }
    }
}

/// Terminal error surfaced by the request pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// The circuit breaker for `operation` is open; no call was attempted.
    #[error("circuit breaker open for operation `{operation}`")]
    CircuitOpen {
        operation: String,
        retry_after: Option<Duration>,
    },

    /// Retry policy exhausted. Carries the final attempt's error unmodified.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: CallError },

    /// The request was cancelled by its cancellation signal.
    #[error("request was cancelled")]
    Aborted,

    /// The batch this request was a member of failed as a whole, or the
    /// scheduler could not route a result back to the waiter.
    #[error("batch execution failed: {message}")]
    BatchFailed { message: String },

    /// A remote call failed with a non-retryable error.
    #[error(transparent)]
    Call(#[from] CallError),
}

impl PipelineError {
    /// True when the failure was caused by the caller's own cancellation
    /// signal, so hosts can suppress user-visible error UI.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Aborted)
    }

    /// The underlying remote-call error, when one exists.
    pub fn call_error(&self) -> Option<&CallError> {
        match self {
            PipelineError::RetryExhausted { last_error, .. } => Some(last_error),
            PipelineError::Call(err) => Some(err),
            _ => None,
        }
    }
}
