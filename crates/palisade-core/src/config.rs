//! Configuration types for the screening gateway.
//!
//! Every threshold, weight, and budget the pipeline consults lives here -
//! nothing is hardcoded in the engines. [`GatewayConfig::validate`] runs at
//! construction and fails fast, so an orchestrator never accepts traffic
//! with inconsistent thresholds or weights.

use crate::error::GatewayError;
use palisade_detectors::{DetectorCategory, DetectorId};
use palisade_pool::Backpressure;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// How aggressively verdicts turn into actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTier {
    /// Observe only: every verdict passes through, all are audited.
    Passive,
    /// Sanitize deep-path allows, quarantine blocks (reversible).
    Balanced,
    /// Block high-severity outright (non-reversible), sanitize the rest.
    Aggressive,
}

/// What to do when the verification engine is unreachable or over deadline.
///
/// This is an explicit configuration choice, not an engine default: deny
/// deployments fail closed to Block, permissive deployments fail open to
/// Allow-with-warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationFailurePolicy {
    /// Resolve to Allow with a warning in the verdict reason.
    FailOpen,
    /// Resolve to Block.
    FailClosed,
}

/// Configuration for the screening gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// End-to-end budget for the fast path (cache, fan-out, aggregate,
    /// threshold decision).
    pub fast_path_deadline: Duration,

    /// End-to-end budget when escalation runs, measured from receipt.
    pub deep_path_deadline: Duration,

    /// Scores below this are allowed on the fast path.
    pub low_threshold: f64,

    /// Scores at or above this are blocked on the fast path.
    pub high_threshold: f64,

    /// Vote weight per detector category. Re-normalized at aggregation time
    /// over the categories that actually reported.
    pub detector_weights: HashMap<DetectorCategory, f64>,

    /// Categories where any match forces Block, regardless of the weighted
    /// score (deny overrides allow).
    pub always_block: HashSet<DetectorCategory>,

    /// Categories treated as high severity by the aggressive tier.
    pub high_severity: HashSet<DetectorCategory>,

    /// Action strategy tier.
    pub strategy_tier: StrategyTier,

    /// Maximum entries per cache instance.
    pub cache_size: usize,

    /// Time-to-live for cache entries.
    pub cache_ttl: Duration,

    /// Number of worker pool execution slots.
    pub worker_pool_size: usize,

    /// How long task admission may wait when the pool is saturated.
    pub admission_timeout: Duration,

    /// Saturation policy for pool admission.
    pub backpressure: Backpressure,

    /// Resolution of escalation failures.
    pub escalation_failure_policy: EscalationFailurePolicy,

    /// Run detectors on the calling task when the pool is saturated or
    /// unavailable, instead of failing the request.
    pub sequential_fallback: bool,

    /// Detectors enabled by default (requests may narrow this further).
    pub enabled_detectors: HashSet<DetectorId>,

    /// Neighbors requested per similarity lookup.
    pub similarity_k: usize,

    /// Minimum similarity for an index match to count.
    pub similarity_threshold: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            fast_path_deadline: Duration::from_millis(8),
            deep_path_deadline: Duration::from_millis(250),
            low_threshold: 0.3,
            high_threshold: 0.8,
            detector_weights: HashMap::from([
                (DetectorCategory::Pattern, 0.4),
                (DetectorCategory::Similarity, 0.3),
                (DetectorCategory::Symbolic, 0.2),
                (DetectorCategory::Pii, 0.1),
            ]),
            always_block: HashSet::new(),
            high_severity: HashSet::from([DetectorCategory::Pattern, DetectorCategory::Pii]),
            strategy_tier: StrategyTier::Balanced,
            cache_size: 1024,
            cache_ttl: Duration::from_secs(300),
            worker_pool_size: 4,
            admission_timeout: Duration::from_millis(50),
            backpressure: Backpressure::Block,
            escalation_failure_policy: EscalationFailurePolicy::FailClosed,
            sequential_fallback: true,
            enabled_detectors: HashSet::from(DetectorId::ALL),
            similarity_k: 5,
            similarity_threshold: 0.8,
        }
    }
}

impl GatewayConfig {
    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] naming the first problem found.
    /// Called from the orchestrator constructor so an invalid configuration
    /// never serves traffic.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.fast_path_deadline.is_zero() {
            return Err(GatewayError::Config(
                "fast_path_deadline must be non-zero".into(),
            ));
        }
        if self.deep_path_deadline < self.fast_path_deadline {
            return Err(GatewayError::Config(
                "deep_path_deadline must not be shorter than fast_path_deadline".into(),
            ));
        }
        if !self.low_threshold.is_finite() || !(0.0..=1.0).contains(&self.low_threshold) {
            return Err(GatewayError::Config(format!(
                "low_threshold {} outside 0.0..=1.0",
                self.low_threshold
            )));
        }
        if !self.high_threshold.is_finite() || !(0.0..=1.0).contains(&self.high_threshold) {
            return Err(GatewayError::Config(format!(
                "high_threshold {} outside 0.0..=1.0",
                self.high_threshold
            )));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(GatewayError::Config(format!(
                "low_threshold {} must be below high_threshold {}",
                self.low_threshold, self.high_threshold
            )));
        }

        let mut weight_sum = 0.0;
        for (category, weight) in &self.detector_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(GatewayError::Config(format!(
                    "weight for {category} must be finite and non-negative, got {weight}"
                )));
            }
            weight_sum += weight;
        }
        if weight_sum <= 0.0 {
            return Err(GatewayError::Config(
                "detector_weights must sum to a positive value".into(),
            ));
        }

        if self.enabled_detectors.is_empty() {
            return Err(GatewayError::Config(
                "at least one detector must be enabled".into(),
            ));
        }
        if self.cache_size == 0 {
            return Err(GatewayError::Config("cache_size must be at least 1".into()));
        }
        if self.worker_pool_size == 0 {
            return Err(GatewayError::Config(
                "worker_pool_size must be at least 1".into(),
            ));
        }
        if self.similarity_k == 0 {
            return Err(GatewayError::Config("similarity_k must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(GatewayError::Config(format!(
                "similarity_threshold {} outside 0.0..=1.0",
                self.similarity_threshold
            )));
        }

        Ok(())
    }
}
