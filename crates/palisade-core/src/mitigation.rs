//! Verdict-to-action mapping and the rollback vault.
//!
//! ## Reversibility
//!
//! The asymmetry is deliberate and part of the API contract:
//!
//! | Action | Token | Rollback |
//! |--------|-------|----------|
//! | Pass | none | n/a |
//! | Quarantine | yes | restores the original content |
//! | Sanitize | yes | refused: the scrubbed output may already have been forwarded |
//! | Block | none | refused: nothing was retained to restore |
//!
//! Quarantine holds the original content in an in-memory vault so
//! `rollback` can release it; sanitize and block are defined as
//! non-reversible, and their tokens (sanitize) exist so the refusal is
//! explicit rather than a lookup miss.

use crate::audit::{AuditRecord, AuditSink};
use crate::config::StrategyTier;
use crate::decision::{Outcome, Verdict};
use crate::error::GatewayError;
use crate::request::DetectionRequest;
use palisade_detectors::{scrub, DetectorCategory, SignatureDetector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};
use uuid::Uuid;

/// The concrete action applied to screened content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Forward the content unchanged.
    Pass,
    /// Forward with flagged spans redacted and invisible characters
    /// scrubbed.
    Sanitize,
    /// Hold the content; reversible via rollback.
    Quarantine,
    /// Reject the content outright; nothing is retained.
    Block,
}

/// The final product of one screening invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationAction {
    /// What was done.
    pub action: ActionKind,
    /// Content to forward upstream: the original for Pass, the scrubbed
    /// text for Sanitize, nothing for Quarantine/Block.
    pub content: Option<String>,
    /// Present on Quarantine (reversible) and Sanitize (refusal is
    /// explicit).
    pub rollback_token: Option<Uuid>,
    /// The audit record emitted for this action.
    pub audit: AuditRecord,
}

enum VaultEntry {
    Quarantined { content: String },
    Sanitized,
}

/// Maps verdicts to actions under the configured strategy tier.
pub struct MitigationEngine {
    tier: StrategyTier,
    high_severity: HashSet<DetectorCategory>,
    signatures: SignatureDetector,
    vault: Mutex<HashMap<Uuid, VaultEntry>>,
    audit: Arc<dyn AuditSink>,
}

impl MitigationEngine {
    /// Creates the engine.
    pub fn new(
        tier: StrategyTier,
        high_severity: HashSet<DetectorCategory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            tier,
            high_severity,
            signatures: SignatureDetector::new(),
            vault: Mutex::new(HashMap::new()),
            audit,
        }
    }

    /// Applies the configured tier to a verdict, producing the action and
    /// its audit record.
    pub fn apply(&self, verdict: &Verdict, request: &DetectionRequest) -> MitigationAction {
        let (action, content, token) = match self.tier {
            StrategyTier::Passive => {
                // Observe-only: everything passes, everything is audited.
                (ActionKind::Pass, Some(request.content.clone()), None)
            }
            StrategyTier::Balanced => self.apply_balanced(verdict, request),
            StrategyTier::Aggressive => self.apply_aggressive(verdict, request),
        };

        let record = AuditRecord {
            timestamp: SystemTime::now(),
            request_id: request.id,
            outcome: verdict.outcome,
            path: verdict.path,
            action,
            tier: self.tier,
            reason: verdict.reason.clone(),
        };
        self.audit.write(&record);

        MitigationAction {
            action,
            content,
            rollback_token: token,
            audit: record,
        }
    }

    fn apply_balanced(
        &self,
        verdict: &Verdict,
        request: &DetectionRequest,
    ) -> (ActionKind, Option<String>, Option<Uuid>) {
        use crate::decision::DecisionPath;

        match verdict.outcome {
            // A fast-path allow is clean; a deep-path allow was ambiguous
            // enough to escalate, so its flagged spans are sanitized.
            Outcome::Allow => match verdict.path {
                DecisionPath::Fast => (ActionKind::Pass, Some(request.content.clone()), None),
                DecisionPath::Deep => {
                    let token = self.issue_sanitize_token();
                    (
                        ActionKind::Sanitize,
                        Some(self.sanitize(&request.content)),
                        Some(token),
                    )
                }
            },
            Outcome::Block | Outcome::Escalate => {
                let token = self.quarantine(request);
                (ActionKind::Quarantine, None, Some(token))
            }
        }
    }

    fn apply_aggressive(
        &self,
        verdict: &Verdict,
        request: &DetectionRequest,
    ) -> (ActionKind, Option<String>, Option<Uuid>) {
        match verdict.outcome {
            Outcome::Allow => (ActionKind::Pass, Some(request.content.clone()), None),
            Outcome::Block | Outcome::Escalate => {
                let high_severity = verdict
                    .category
                    .map(|c| self.high_severity.contains(&c))
                    .unwrap_or(false);

                if high_severity {
                    (ActionKind::Block, None, None)
                } else {
                    let token = self.issue_sanitize_token();
                    (
                        ActionKind::Sanitize,
                        Some(self.sanitize(&request.content)),
                        Some(token),
                    )
                }
            }
        }
    }

    fn sanitize(&self, content: &str) -> String {
        scrub::scrub(&scrub::strip_ansi(&self.signatures.redact(content)))
    }

    fn quarantine(&self, request: &DetectionRequest) -> Uuid {
        let token = Uuid::new_v4();
        self.vault.lock().insert(
            token,
            VaultEntry::Quarantined {
                content: request.content.clone(),
            },
        );
        info!(request = %request.id, %token, "content quarantined");
        token
    }

    fn issue_sanitize_token(&self) -> Uuid {
        let token = Uuid::new_v4();
        self.vault.lock().insert(token, VaultEntry::Sanitized);
        token
    }

    /// Undoes a reversible action, returning the restored content.
    ///
    /// Only quarantine is reversible. Sanitize tokens are refused with
    /// [`GatewayError::RollbackNotReversible`]; unknown tokens (including
    /// block, which never issues one) with [`GatewayError::RollbackNotFound`].
    pub fn rollback(&self, token: &Uuid) -> Result<String, GatewayError> {
        let mut vault = self.vault.lock();
        match vault.get(token) {
            Some(VaultEntry::Quarantined { .. }) => {
                if let Some(VaultEntry::Quarantined { content }) = vault.remove(token) {
                    debug!(%token, "quarantine rolled back");
                    Ok(content)
                } else {
                    Err(GatewayError::RollbackNotFound)
                }
            }
            Some(VaultEntry::Sanitized) => Err(GatewayError::RollbackNotReversible(
                "sanitize output may already have been forwarded",
            )),
            None => Err(GatewayError::RollbackNotFound),
        }
    }

    /// Number of entries currently held in the vault.
    pub fn vault_len(&self) -> usize {
        self.vault.lock().len()
    }
}
