//! Result and identity types shared by every detector unit.

use palisade_cache::CacheValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Request metadata passed through to detectors.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Identity of a detector unit. The set is closed: adding a detector is a
/// compile-time variant addition here and in [`crate::DetectorUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorId {
    /// Literal signature matcher.
    Signature,
    /// Shannon-entropy / structural heuristic scorer.
    Entropy,
    /// Vector-similarity matcher backed by the external index.
    Similarity,
    /// Personally identifiable information scanner.
    Pii,
}

impl DetectorId {
    /// All detector identities, in dispatch order.
    pub const ALL: [DetectorId; 4] = [
        DetectorId::Signature,
        DetectorId::Entropy,
        DetectorId::Similarity,
        DetectorId::Pii,
    ];
}

impl fmt::Display for DetectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorId::Signature => "signature",
            DetectorId::Entropy => "entropy",
            DetectorId::Similarity => "similarity",
            DetectorId::Pii => "pii",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for DetectorId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signature" => Ok(DetectorId::Signature),
            "entropy" => Ok(DetectorId::Entropy),
            "similarity" => Ok(DetectorId::Similarity),
            "pii" => Ok(DetectorId::Pii),
            other => Err(format!("unknown detector: {other}")),
        }
    }
}

/// Category a detector result votes under.
///
/// The aggregation weights are keyed by category, and the fixed priority
/// order below breaks ties deterministically when picking the category of an
/// aggregated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorCategory {
    /// Literal signature / pattern match.
    Pattern,
    /// Vector-similarity match.
    Similarity,
    /// Symbolic or structural heuristic.
    Symbolic,
    /// Personally identifiable information.
    Pii,
    /// Anything else.
    Other,
}

impl DetectorCategory {
    /// Tie-break priority: lower rank wins (pattern beats similarity beats
    /// symbolic beats PII beats other).
    pub const fn priority(self) -> u8 {
        match self {
            DetectorCategory::Pattern => 0,
            DetectorCategory::Similarity => 1,
            DetectorCategory::Symbolic => 2,
            DetectorCategory::Pii => 3,
            DetectorCategory::Other => 4,
        }
    }
}

impl fmt::Display for DetectorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorCategory::Pattern => "pattern",
            DetectorCategory::Similarity => "similarity",
            DetectorCategory::Symbolic => "symbolic",
            DetectorCategory::Pii => "pii",
            DetectorCategory::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// The result of one detector unit scoring one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    /// Which unit produced this result.
    pub detector: DetectorId,
    /// Whether the unit found anything at all.
    pub matched: bool,
    /// Threat score in `0.0..=1.0`.
    pub score: f64,
    /// Category the score votes under.
    pub category: DetectorCategory,
    /// Human-readable evidence.
    pub detail: String,
    /// Wall time the unit spent scoring.
    pub latency: Duration,
}

impl DetectorResult {
    /// A no-match result with zero score.
    pub fn clean(detector: DetectorId, category: DetectorCategory) -> Self {
        Self {
            detector,
            matched: false,
            score: 0.0,
            category,
            detail: String::new(),
            latency: Duration::ZERO,
        }
    }
}

impl CacheValue for DetectorResult {
    fn is_consistent(&self) -> bool {
        self.score.is_finite() && (0.0..=1.0).contains(&self.score)
    }

    fn approx_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.detail.len()
    }
}

/// Failure of a detector unit. Absorbed by the pipeline: a failed unit is
/// excluded from the vote, never fatal to the request.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The embedding collaborator failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The similarity index collaborator failed or is unreachable.
    #[error("similarity index unavailable: {0}")]
    Index(String),

    /// The unit itself failed.
    #[error("detector failed: {0}")]
    Internal(String),
}
