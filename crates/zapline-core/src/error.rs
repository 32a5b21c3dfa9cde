//! Error taxonomy for the scheduler core.
//!
//! Validation and conflict errors surface synchronously to the caller;
//! transport errors are classified as retryable or terminal and recovered
//! inside the dispatch loop, never propagated as a process fault.

use thiserror::Error;

/// Service-level result alias.
pub type Result<T> = std::result::Result<T, ZaplineError>;

/// Top-level service error.
#[derive(Debug, Error)]
pub enum ZaplineError {
    /// Malformed recipient or empty/oversized message — rejected at creation,
    /// never stored.
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation against an unknown schedule ID.
    #[error("schedule not found: {0}")]
    NotFound(String),

    /// Operation against a schedule in an incompatible state
    /// (cancel/delete on non-pending).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Schedule store failure (SQLite open, query, or migration).
    #[error("store error: {0}")]
    Store(String),

    /// Delivery failure reported by the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bad or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Transport delivery error, tagged with retryability.
///
/// Retryable failures are transient (the next attempt may succeed); terminal
/// failures mean the recipient can never be reached with this message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The send did not complete within the per-call deadline.
    #[error("transport timeout")]
    Timeout,

    /// Transport temporarily unreachable (network error, 5xx).
    #[error("transport unreachable: {0}")]
    Unreachable(String),

    /// The transport throttled us (HTTP 429).
    #[error("rate limited by transport")]
    RateLimited,

    /// Recipient is not on the messaging network or the number is
    /// permanently invalid.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The recipient has blocked this sender.
    #[error("recipient blocked sender")]
    Blocked,

    /// The transport rejected the request for a non-transient reason
    /// (bad credentials, malformed payload).
    #[error("transport rejected request: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the dispatch loop should retry this failure.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::Unreachable(_) | TransportError::RateLimited
        )
    }
}
