//! Weighted-vote aggregation of detector results.
//!
//! Each reporting detector contributes `weight[category] * score` to the
//! final score, with weights re-normalized over only the detectors that
//! actually returned within the deadline - a timed-out detector is
//! excluded, never counted as a zero vote. The fold is commutative and
//! associative: result ordering never affects the output.

use palisade_cache::CacheValue;
use palisade_detectors::{DetectorCategory, DetectorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The combined verdict data for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Request this aggregate belongs to.
    pub request_id: Uuid,
    /// Weighted score in `0.0..=1.0`.
    pub score: f64,
    /// Category of the dominant matched contribution.
    pub category: DetectorCategory,
    /// Score discounted by the weight fraction that reported.
    pub confidence: f64,
    /// The individual results that went into the vote.
    pub detector_results: Vec<DetectorResult>,
    /// True when one or more detectors timed out or errored and were
    /// excluded from the vote.
    pub partial: bool,
}

impl AggregatedResult {
    /// Whether any detector in the vote matched the given category.
    pub fn matched_category(&self, category: DetectorCategory) -> bool {
        self.detector_results
            .iter()
            .any(|r| r.matched && r.category == category)
    }
}

impl CacheValue for AggregatedResult {
    fn is_consistent(&self) -> bool {
        self.score.is_finite()
            && (0.0..=1.0).contains(&self.score)
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
            && self.detector_results.iter().all(|r| r.is_consistent())
    }

    fn approx_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .detector_results
                .iter()
                .map(|r| r.approx_bytes())
                .sum::<usize>()
    }
}

/// Folds detector results into one [`AggregatedResult`] by weighted voting.
#[derive(Debug, Clone)]
pub struct Aggregator {
    weights: HashMap<DetectorCategory, f64>,
}

impl Aggregator {
    /// Creates an aggregator with the configured category weights.
    pub fn new(weights: HashMap<DetectorCategory, f64>) -> Self {
        Self { weights }
    }

    fn weight_of(&self, category: DetectorCategory) -> f64 {
        self.weights.get(&category).copied().unwrap_or(0.0)
    }

    /// Combines `results` into one aggregate.
    ///
    /// `expected` names the categories of every detector that was
    /// dispatched; the gap between expected weight and reporting weight is
    /// what discounts the confidence. The aggregate `category` is the
    /// category of the highest weighted contribution among matched results,
    /// with ties broken by the higher individual score and then the fixed
    /// category priority order, so the fold is deterministic under any
    /// result ordering.
    pub fn fold(
        &self,
        request_id: Uuid,
        results: Vec<DetectorResult>,
        expected: &[DetectorCategory],
        partial: bool,
    ) -> AggregatedResult {
        let reporting_weight: f64 = results.iter().map(|r| self.weight_of(r.category)).sum();
        let expected_weight: f64 = expected.iter().map(|&c| self.weight_of(c)).sum();

        let score = if reporting_weight > 0.0 {
            let weighted: f64 = results
                .iter()
                .map(|r| self.weight_of(r.category) * r.score)
                .sum();
            (weighted / reporting_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let reporting_fraction = if expected_weight > 0.0 {
            (reporting_weight / expected_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let confidence = (score * reporting_fraction).clamp(0.0, 1.0);

        let category = self.dominant_category(&results);

        AggregatedResult {
            request_id,
            score,
            category,
            confidence,
            detector_results: results,
            partial,
        }
    }

    /// Picks the category of the strongest matched contribution.
    fn dominant_category(&self, results: &[DetectorResult]) -> DetectorCategory {
        let mut best: Option<&DetectorResult> = None;

        for candidate in results.iter().filter(|r| r.matched) {
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    let candidate_contribution =
                        self.weight_of(candidate.category) * candidate.score;
                    let current_contribution = self.weight_of(current.category) * current.score;

                    match candidate_contribution.total_cmp(&current_contribution) {
                        std::cmp::Ordering::Greater => candidate,
                        std::cmp::Ordering::Less => current,
                        std::cmp::Ordering::Equal => {
                            match candidate.score.total_cmp(&current.score) {
                                std::cmp::Ordering::Greater => candidate,
                                std::cmp::Ordering::Less => current,
                                std::cmp::Ordering::Equal => {
                                    if candidate.category.priority()
                                        < current.category.priority()
                                    {
                                        candidate
                                    } else {
                                        current
                                    }
                                }
                            }
                        }
                    }
                }
            });
        }

        best.map(|r| r.category).unwrap_or(DetectorCategory::Other)
    }
}
