//! Screening request types.

use palisade_detectors::{DetectorId, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Per-request overrides recognized by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenOptions {
    /// Overrides the configured block threshold for this request only.
    pub threshold: Option<f64>,

    /// Narrows the detector set for this request. Detectors not enabled in
    /// the gateway configuration stay disabled regardless.
    pub enabled_detectors: Option<HashSet<DetectorId>>,

    /// Caps the fast-path budget for this request. Never extends the
    /// configured budget.
    pub deadline: Option<Duration>,
}

/// One piece of content to screen.
///
/// Created per incoming call, owned by a single orchestrator invocation,
/// and dropped when it returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRequest {
    /// Request identity, carried through results and audit records.
    pub id: Uuid,
    /// The content under screening.
    pub content: String,
    /// Caller-supplied context, passed through to detectors.
    pub metadata: Metadata,
    /// Per-request overrides.
    pub options: ScreenOptions,
}

impl DetectionRequest {
    /// Creates a request with a fresh id and default options.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            metadata: Metadata::new(),
            options: ScreenOptions::default(),
        }
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Caps the fast-path budget for this request.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.options.deadline = Some(deadline);
        self
    }

    /// Restricts which detectors run for this request.
    pub fn with_detectors(mut self, detectors: impl IntoIterator<Item = DetectorId>) -> Self {
        self.options.enabled_detectors = Some(detectors.into_iter().collect());
        self
    }

    /// Overrides the block threshold for this request.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.options.threshold = Some(threshold);
        self
    }
}
