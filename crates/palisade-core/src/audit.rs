//! Fire-and-forget observability hooks.
//!
//! Audit and metrics sinks are collaborator traits: the pipeline calls them
//! on every action and never looks at the outcome. Implementations must not
//! block or panic; a failing sink degrades observability, never a verdict.

use crate::config::StrategyTier;
use crate::decision::{DecisionPath, Outcome};
use crate::mitigation::ActionKind;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::{debug, info};
use uuid::Uuid;

/// One audited mitigation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the action was produced.
    pub timestamp: SystemTime,
    /// The screened request.
    pub request_id: Uuid,
    /// Verdict disposition.
    pub outcome: Outcome,
    /// Fast or deep path.
    pub path: DecisionPath,
    /// The concrete action taken.
    pub action: ActionKind,
    /// Strategy tier in force.
    pub tier: StrategyTier,
    /// Verdict reasoning.
    pub reason: String,
}

/// Receives audit records. Write failures must never affect verdicts.
pub trait AuditSink: Send + Sync {
    /// Records one mitigation decision.
    fn write(&self, record: &AuditRecord);
}

/// Receives pipeline measurements. Observation failures must never affect
/// verdicts.
pub trait MetricsSink: Send + Sync {
    /// Records one named measurement with optional labels.
    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Default audit sink: structured log events under the `palisade::audit`
/// target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, record: &AuditRecord) {
        info!(
            target: "palisade::audit",
            request = %record.request_id,
            outcome = ?record.outcome,
            path = ?record.path,
            action = ?record.action,
            tier = ?record.tier,
            reason = %record.reason,
            "mitigation applied"
        );
    }
}

/// Default metrics sink: debug-level log events under `palisade::metrics`.
#[derive(Debug, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        debug!(target: "palisade::metrics", name, value, ?labels, "observation");
    }
}
