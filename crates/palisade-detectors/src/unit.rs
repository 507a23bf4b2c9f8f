//! The closed set of detector units.
//!
//! Detector dispatch is a tagged enum rather than trait objects: the
//! pipeline treats the set as fixed, and adding a detector type is a
//! compile-time variant addition here. Every variant shares one `score`
//! surface so the pool and aggregator handle them uniformly.

use crate::entropy::EntropyDetector;
use crate::pii::PiiDetector;
use crate::result::{DetectorCategory, DetectorError, DetectorId, DetectorResult, Metadata};
use crate::signature::SignatureDetector;
use crate::similarity::SimilarityDetector;
use std::time::Instant;

/// One independent scorer in the detection pipeline.
///
/// Units are side-effect-free given their inputs and safe to invoke
/// concurrently on different content. A unit cancelled mid-score (its
/// future dropped at the deadline) produces no result; the aggregator
/// excludes it rather than counting a zero.
pub enum DetectorUnit {
    /// Literal signature matcher.
    Signature(SignatureDetector),
    /// Entropy / structural heuristics.
    Entropy(EntropyDetector),
    /// Vector-similarity matcher.
    Similarity(SimilarityDetector),
    /// PII scanner.
    Pii(PiiDetector),
}

impl DetectorUnit {
    /// The unit's identity.
    pub fn id(&self) -> DetectorId {
        match self {
            DetectorUnit::Signature(_) => DetectorId::Signature,
            DetectorUnit::Entropy(_) => DetectorId::Entropy,
            DetectorUnit::Similarity(_) => DetectorId::Similarity,
            DetectorUnit::Pii(_) => DetectorId::Pii,
        }
    }

    /// The category this unit votes under.
    pub fn category(&self) -> DetectorCategory {
        match self {
            DetectorUnit::Signature(_) => DetectorCategory::Pattern,
            DetectorUnit::Entropy(_) => DetectorCategory::Symbolic,
            DetectorUnit::Similarity(_) => DetectorCategory::Similarity,
            DetectorUnit::Pii(_) => DetectorCategory::Pii,
        }
    }

    /// Scores `content`, recording the unit's wall time in the result.
    ///
    /// `metadata` is available to units that want request context; the
    /// built-in units score content alone.
    pub async fn score(
        &self,
        content: &str,
        _metadata: &Metadata,
    ) -> Result<DetectorResult, DetectorError> {
        let started = Instant::now();
        let mut result = match self {
            DetectorUnit::Signature(detector) => detector.evaluate(content),
            DetectorUnit::Entropy(detector) => detector.evaluate(content),
            DetectorUnit::Pii(detector) => detector.evaluate(content),
            DetectorUnit::Similarity(detector) => detector.evaluate(content).await?,
        };
        result.latency = started.elapsed();
        Ok(result)
    }
}
