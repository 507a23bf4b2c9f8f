//! The two-tier decision state machine.
//!
//! ```text
//! RECEIVED ──► FAST_EVAL ──► ALLOWED
//!                  │    └──► BLOCKED
//!                  ▼
//!             ESCALATING ──► DEEP_EVAL ──► ALLOWED | BLOCKED
//! ```
//!
//! The fast path is threshold banding over the aggregated score, with one
//! override: any detector flagging an always-block category forces BLOCKED
//! regardless of the weighted score (deny overrides allow). The ambiguous
//! band between the thresholds escalates to the deep path, whose outcome is
//! decided by the external verification engine - or, when that engine fails,
//! by the configured failure policy.

use crate::aggregate::AggregatedResult;
use crate::config::EscalationFailurePolicy;
use crate::escalation::VerificationResult;
use palisade_detectors::DetectorCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Terminal disposition of a screening decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Content may proceed.
    Allow,
    /// Ambiguous: the deep path must decide. Never terminal.
    Escalate,
    /// Content must not proceed.
    Block,
}

/// Which path produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPath {
    /// Threshold banding over the aggregate, within the fast budget.
    Fast,
    /// External verification, within the deep budget.
    Deep,
}

/// States of the decision process. Tracked for tracing and tests; the
/// transitions themselves are encoded in the engine methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionState {
    Received,
    FastEval,
    Allowed,
    Blocked,
    Escalating,
    DeepEval,
}

/// The decision for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// The disposition.
    pub outcome: Outcome,
    /// Which path decided it.
    pub path: DecisionPath,
    /// Human-readable reasoning for audit trails.
    pub reason: String,
    /// Category that drove the decision, when one did.
    pub category: Option<DetectorCategory>,
}

impl Verdict {
    /// Returns true for an Allow verdict.
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    /// Returns true for a Block verdict.
    pub fn is_blocked(&self) -> bool {
        self.outcome == Outcome::Block
    }
}

/// Threshold-band decision engine.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    low_threshold: f64,
    high_threshold: f64,
    always_block: HashSet<DetectorCategory>,
}

impl DecisionEngine {
    /// Creates the engine from validated configuration values.
    pub fn new(
        low_threshold: f64,
        high_threshold: f64,
        always_block: HashSet<DetectorCategory>,
    ) -> Self {
        Self {
            low_threshold,
            high_threshold,
            always_block,
        }
    }

    /// Runs `RECEIVED -> FAST_EVAL -> {ALLOWED, BLOCKED, ESCALATING}`.
    ///
    /// `threshold_override`, when present, replaces the configured block
    /// threshold for this request only. The deny-override check runs first:
    /// it is immune to threshold tuning by design.
    pub fn fast_eval(
        &self,
        aggregated: &AggregatedResult,
        threshold_override: Option<f64>,
    ) -> Verdict {
        debug!(
            request = %aggregated.request_id,
            score = aggregated.score,
            partial = aggregated.partial,
            "state {:?} -> {:?}",
            DecisionState::Received,
            DecisionState::FastEval,
        );

        for category in &self.always_block {
            if aggregated.matched_category(*category) {
                warn!(
                    request = %aggregated.request_id,
                    %category,
                    "always-block category matched; deny overrides allow"
                );
                return Verdict {
                    outcome: Outcome::Block,
                    path: DecisionPath::Fast,
                    reason: format!("always-block category '{category}' matched"),
                    category: Some(*category),
                };
            }
        }

        let high = threshold_override.unwrap_or(self.high_threshold);
        let score = aggregated.score;

        if score >= high {
            Verdict {
                outcome: Outcome::Block,
                path: DecisionPath::Fast,
                reason: format!("score {score:.3} at or above block threshold {high:.3}"),
                category: Some(aggregated.category),
            }
        } else if score < self.low_threshold {
            Verdict {
                outcome: Outcome::Allow,
                path: DecisionPath::Fast,
                reason: format!("score {score:.3} below allow threshold {:.3}", self.low_threshold),
                category: None,
            }
        } else {
            debug!(
                request = %aggregated.request_id,
                "state {:?} -> {:?}",
                DecisionState::FastEval,
                DecisionState::Escalating,
            );
            Verdict {
                outcome: Outcome::Escalate,
                path: DecisionPath::Fast,
                reason: format!(
                    "score {score:.3} in ambiguous band [{:.3}, {high:.3})",
                    self.low_threshold
                ),
                category: Some(aggregated.category),
            }
        }
    }

    /// Runs `DEEP_EVAL -> {ALLOWED, BLOCKED}` from a verification result.
    pub fn deep_verdict(
        &self,
        verification: &VerificationResult,
        aggregated: &AggregatedResult,
    ) -> Verdict {
        debug!(
            request = %aggregated.request_id,
            valid = verification.valid,
            "state {:?} -> {:?}",
            DecisionState::Escalating,
            DecisionState::DeepEval,
        );

        if verification.valid {
            Verdict {
                outcome: Outcome::Allow,
                path: DecisionPath::Deep,
                reason: "verification engine confirmed content acceptable".to_string(),
                category: None,
            }
        } else {
            let detail = if verification.errors.is_empty() {
                "verification engine rejected content".to_string()
            } else {
                format!(
                    "verification engine rejected content: {}",
                    verification.errors.join("; ")
                )
            };
            Verdict {
                outcome: Outcome::Block,
                path: DecisionPath::Deep,
                reason: detail,
                category: Some(aggregated.category),
            }
        }
    }

    /// Resolves a failed or over-deadline escalation per the configured
    /// policy: fail closed to Block, or fail open to Allow-with-warning.
    pub fn escalation_failed(
        &self,
        policy: EscalationFailurePolicy,
        detail: &str,
        aggregated: &AggregatedResult,
    ) -> Verdict {
        warn!(
            request = %aggregated.request_id,
            ?policy,
            detail,
            "escalation unavailable"
        );

        match policy {
            EscalationFailurePolicy::FailClosed => Verdict {
                outcome: Outcome::Block,
                path: DecisionPath::Deep,
                reason: format!("escalation unavailable ({detail}); failing closed"),
                category: Some(aggregated.category),
            },
            EscalationFailurePolicy::FailOpen => Verdict {
                outcome: Outcome::Allow,
                path: DecisionPath::Deep,
                reason: format!(
                    "warning: escalation unavailable ({detail}); failing open with score {:.3}",
                    aggregated.score
                ),
                category: Some(aggregated.category),
            },
        }
    }
}
