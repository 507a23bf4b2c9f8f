//! # Palisade Core
//!
//! Request-time defense pipeline for LLM traffic. Screens content for
//! malicious or policy-violating patterns, decides in real time whether to
//! allow, sanitize, or block, and escalates ambiguous cases to a slower,
//! more rigorous verification path. Sits in front of an upstream model/API
//! call as a proxy layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      PALISADE ORCHESTRATOR                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  request ─► ContentCache ─miss─► WorkerPool ─► Aggregator       │
//! │                 │                (detectors        │            │
//! │                 hit               in parallel)     ▼            │
//! │                 │                            DecisionEngine     │
//! │                 │                             │          │      │
//! │                 │                        fast verdict  escalate │
//! │                 │                             │          │      │
//! │                 │                             │   EscalationCl. │
//! │                 ▼                             ▼          │      │
//! │            MitigationStrategy ◄───────────────┴──────────┘      │
//! │                 │                                               │
//! │                 ▼                                               │
//! │        action + audit + metrics                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two-tier decisions
//!
//! | Path | Budget | Decides |
//! |------|--------|---------|
//! | Fast | single-digit milliseconds | threshold banding over the weighted detector vote |
//! | Deep | a few hundred milliseconds | external verification engine, only for the ambiguous band |
//!
//! ## Posture
//!
//! Detector failures degrade confidence, never fail the request. The
//! pipeline always produces a verdict unless configuration was rejected at
//! startup or the pool is saturated with fallback disabled. Escalation
//! failures resolve through an explicit fail-open/fail-closed configuration
//! choice.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use palisade_core::{DetectionRequest, Externals, GatewayConfig, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(
//!     GatewayConfig::default(),
//!     Externals::new(embedder, index, verifier),
//! )?;
//!
//! let action = orchestrator.screen(DetectionRequest::new(user_input)).await?;
//! match action.action {
//!     ActionKind::Pass => forward(action.content.unwrap()),
//!     ActionKind::Sanitize => forward(action.content.unwrap()),
//!     ActionKind::Quarantine | ActionKind::Block => reject(action.audit.reason),
//! }
//! ```

mod aggregate;
mod audit;
mod config;
mod decision;
mod error;
mod escalation;
mod mitigation;
mod orchestrator;
mod request;

pub use aggregate::{AggregatedResult, Aggregator};
pub use audit::{AuditRecord, AuditSink, MetricsSink, TracingAuditSink, TracingMetricsSink};
pub use config::{EscalationFailurePolicy, GatewayConfig, StrategyTier};
pub use decision::{DecisionEngine, DecisionPath, DecisionState, Outcome, Verdict};
pub use error::{GatewayError, Result};
pub use escalation::{
    EscalationClient, Proof, VerificationPolicy, VerificationResult, Verifier, VerifierError,
};
pub use mitigation::{ActionKind, MitigationAction, MitigationEngine};
pub use orchestrator::{Externals, GatewayStats, Orchestrator};
pub use request::{DetectionRequest, ScreenOptions};

// Re-export component types for convenience
pub use palisade_cache::{CacheMetrics, ContentCache};
pub use palisade_detectors::{
    DetectorCategory, DetectorId, DetectorResult, IndexMatch, SimilaritySearch, TextEmbedder,
};
pub use palisade_pool::{Backpressure, PoolError, WorkerPool};
