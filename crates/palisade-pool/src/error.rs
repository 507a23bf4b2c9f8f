//! Error types for the worker pool.

use palisade_detectors::{DetectorError, DetectorId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors surfaced to the pool's caller.
///
/// Per-detector failures are not errors at this level; they are collected
/// into the fan-out report and excluded from the vote.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No execution slot became available within the admission timeout.
    #[error("pool saturated: no slot available within {timeout:?}")]
    Saturated {
        /// The admission timeout that elapsed.
        timeout: Duration,
    },

    /// The pool could not start its workers at all.
    #[error("pool unavailable: {0}")]
    Unavailable(String),
}

/// Why a single detector task produced no result.
///
/// These are absorbed by the pipeline: the failing unit is excluded from
/// the vote and the aggregate is marked partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorFailure {
    /// Which unit failed.
    pub detector: DetectorId,
    /// How it failed.
    pub kind: FailureKind,
}

/// The ways a detector task can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The unit exceeded its time slice and was cancelled.
    TimedOut,
    /// The unit returned an error.
    Failed(String),
    /// The unit panicked; the slot survived and self-healed.
    Panicked,
    /// The worker dropped the task before completion (shutdown).
    Dropped,
}

impl DetectorFailure {
    pub(crate) fn timed_out(detector: DetectorId) -> Self {
        Self {
            detector,
            kind: FailureKind::TimedOut,
        }
    }

    pub(crate) fn failed(detector: DetectorId, error: DetectorError) -> Self {
        Self {
            detector,
            kind: FailureKind::Failed(error.to_string()),
        }
    }

    pub(crate) fn panicked(detector: DetectorId) -> Self {
        Self {
            detector,
            kind: FailureKind::Panicked,
        }
    }

    pub(crate) fn dropped(detector: DetectorId) -> Self {
        Self {
            detector,
            kind: FailureKind::Dropped,
        }
    }
}

impl std::fmt::Display for DetectorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FailureKind::TimedOut => write!(f, "{} timed out", self.detector),
            FailureKind::Failed(e) => write!(f, "{} failed: {e}", self.detector),
            FailureKind::Panicked => write!(f, "{} panicked", self.detector),
            FailureKind::Dropped => write!(f, "{} dropped", self.detector),
        }
    }
}
