//! Deep-path escalation to the external verification engine.
//!
//! Only ambiguous fast-path scores reach this module; the common case never
//! pays for it. The engine itself (a formal-verification / proof system) is
//! a collaborator behind the [`Verifier`] trait, invoked with a hard
//! deadline so a hung engine cannot stall the pipeline past the deep-path
//! budget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

/// The policy a claim is verified against. Opaque to the pipeline; the
/// verification engine interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPolicy {
    /// Policy identifier understood by the engine.
    pub name: String,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            name: "default-content-policy".to_string(),
        }
    }
}

/// Machine-checkable evidence attached to a verification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    /// Which engine produced the proof.
    pub engine: String,
    /// Proof steps, in engine-specific notation.
    pub steps: Vec<String>,
}

/// Result returned by the verification engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the claim holds under the policy.
    pub valid: bool,
    /// Optional supporting proof.
    pub proof: Option<Proof>,
    /// Engine-reported problems with the claim.
    pub errors: Vec<String>,
}

/// Failure to obtain a verification result at all.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct VerifierError(pub String);

/// External formal-verification capability.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verifies `claim` against `policy`.
    async fn verify(
        &self,
        claim: &str,
        policy: &VerificationPolicy,
    ) -> Result<VerificationResult, VerifierError>;
}

/// Thin client wrapping the verifier with the deep-path deadline.
pub struct EscalationClient {
    verifier: std::sync::Arc<dyn Verifier>,
    policy: VerificationPolicy,
}

impl EscalationClient {
    /// Creates the client.
    pub fn new(verifier: std::sync::Arc<dyn Verifier>, policy: VerificationPolicy) -> Self {
        Self { verifier, policy }
    }

    /// Verifies `claim`, failing if no result arrives within `deadline`.
    ///
    /// A zero deadline (budget already spent) fails immediately without
    /// calling the engine.
    pub async fn verify_claim(
        &self,
        claim: &str,
        deadline: Duration,
    ) -> Result<VerificationResult, VerifierError> {
        if deadline.is_zero() {
            return Err(VerifierError("deep-path budget exhausted".to_string()));
        }

        debug!(policy = %self.policy.name, ?deadline, "escalating to verification engine");
        match timeout(deadline, self.verifier.verify(claim, &self.policy)).await {
            Ok(result) => result,
            Err(_) => Err(VerifierError(format!(
                "verification engine exceeded deep-path deadline of {deadline:?}"
            ))),
        }
    }
}
