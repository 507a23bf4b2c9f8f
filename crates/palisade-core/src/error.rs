//! Error types for the screening gateway.

use thiserror::Error;

/// Core error type for gateway operations.
///
/// By design, caller-visible failures are rare: detector-level failures are
/// absorbed into lower-confidence verdicts, and escalation failures resolve
/// through the configured failure policy. What remains is configuration
/// rejected at startup, saturation with no fallback, and rollback misuse.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid configuration. Fatal: raised before any traffic is accepted.
    #[error("configuration error: {0}")]
    Config(String),

    /// Worker pool error with no sequential fallback configured.
    #[error("worker pool error: {0}")]
    Pool(#[from] palisade_pool::PoolError),

    /// The rollback token does not name a held action.
    #[error("rollback token not found")]
    RollbackNotFound,

    /// The token names an action that is non-reversible by design.
    #[error("action is not reversible: {0}")]
    RollbackNotReversible(&'static str),
}

/// Core result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
