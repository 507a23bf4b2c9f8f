//! The screening orchestrator.
//!
//! This module provides the public entry point for the detection pipeline.
//! The [`Orchestrator`] owns every component explicitly - caches, worker
//! pool, aggregator, decision engine, escalation client, mitigation engine -
//! and wires them per request:
//!
//! ```text
//! Screen(request)
//!   └─► pattern cache ──hit──────────────────────────┐
//!         │ miss (single-flight)                      │
//!         ▼                                           ▼
//!       WorkerPool fan-out ─► Aggregator ─► DecisionEngine
//!                                               │
//!                              ┌────────────────┤
//!                              ▼                ▼
//!                       EscalationClient   fast verdict
//!                              │                │
//!                              └───────┬────────┘
//!                                      ▼
//!                            MitigationEngine ─► action + audit
//! ```
//!
//! There is no ambient global state: construction takes the configuration
//! and the external collaborators, and an invalid configuration fails fast
//! before any traffic is accepted.

use crate::aggregate::{AggregatedResult, Aggregator};
use crate::audit::{AuditSink, MetricsSink, TracingAuditSink, TracingMetricsSink};
use crate::config::GatewayConfig;
use crate::decision::{DecisionEngine, DecisionPath, Outcome, Verdict};
use crate::error::{GatewayError, Result};
use crate::escalation::{EscalationClient, VerificationPolicy, Verifier};
use crate::mitigation::{MitigationAction, MitigationEngine};
use crate::request::{DetectionRequest, ScreenOptions};

use palisade_cache::{content_key, CacheMetrics, ContentCache};
use palisade_detectors::{
    DetectorCategory, DetectorId, DetectorResult, DetectorUnit, EntropyDetector, PiiDetector,
    SignatureDetector, SimilarityDetector, SimilaritySearch, TextEmbedder,
};
use palisade_pool::{PoolConfig, PoolError, WorkerPool};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The external collaborators the pipeline calls but does not implement.
#[derive(Clone)]
pub struct Externals {
    /// Deterministic content embedding.
    pub embedder: Arc<dyn TextEmbedder>,
    /// Nearest-neighbor index over known-bad content.
    pub index: Arc<dyn SimilaritySearch>,
    /// Formal verification engine for the deep path.
    pub verifier: Arc<dyn Verifier>,
    /// Audit record sink.
    pub audit: Arc<dyn AuditSink>,
    /// Metrics sink.
    pub metrics: Arc<dyn MetricsSink>,
}

impl Externals {
    /// Wires the required collaborators with tracing-backed observability
    /// sinks.
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        index: Arc<dyn SimilaritySearch>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            embedder,
            index,
            verifier,
            audit: Arc::new(TracingAuditSink),
            metrics: Arc::new(TracingMetricsSink),
        }
    }

    /// Replaces the audit sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replaces the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Read-only pipeline introspection.
#[derive(Debug, Clone, Copy)]
pub struct GatewayStats {
    /// Hit fraction across both caches.
    pub cache_hit_rate: f64,
    /// Pattern cache counters.
    pub pattern_cache: CacheMetrics,
    /// Similarity cache counters.
    pub similarity_cache: CacheMetrics,
    /// Fraction of pool slots currently busy (0.0 without a pool).
    pub pool_utilization: f64,
    /// Mean end-to-end latency of fast-path verdicts.
    pub avg_fast_latency: Duration,
    /// Mean end-to-end latency of deep-path verdicts.
    pub avg_deep_latency: Duration,
}

#[derive(Debug, Default)]
struct PathLatency {
    total_micros: AtomicU64,
    count: AtomicU64,
}

impl PathLatency {
    fn record(&self, elapsed: Duration) {
        self.total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn average(&self) -> Duration {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_micros.load(Ordering::Relaxed) / count)
        }
    }
}

/// The screening pipeline facade.
///
/// One instance serves many concurrent requests; the caches and worker pool
/// are the only shared mutable state, and both are internally synchronized
/// with bounded critical sections.
pub struct Orchestrator {
    config: GatewayConfig,
    units: Vec<Arc<DetectorUnit>>,
    pattern_cache: Arc<ContentCache<AggregatedResult>>,
    similarity_cache: Arc<ContentCache<DetectorResult>>,
    pool: Option<WorkerPool>,
    aggregator: Aggregator,
    decision: DecisionEngine,
    escalation: EscalationClient,
    mitigation: MitigationEngine,
    metrics: Arc<dyn MetricsSink>,
    fast_latency: PathLatency,
    deep_latency: PathLatency,
}

impl Orchestrator {
    /// Builds the pipeline from configuration and collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for an inconsistent configuration -
    /// this is fatal by design, before any traffic is accepted.
    ///
    /// A missing async runtime is not an error: the pool is skipped and
    /// detectors run sequentially on the calling task (graceful
    /// degradation).
    pub fn new(config: GatewayConfig, externals: Externals) -> Result<Self> {
        config.validate()?;

        let pattern_cache = Arc::new(ContentCache::new(
            "pattern",
            config.cache_size,
            config.cache_ttl,
        ));
        let similarity_cache = Arc::new(ContentCache::new(
            "similarity",
            config.cache_size,
            config.cache_ttl,
        ));

        let mut units = Vec::new();
        for id in DetectorId::ALL {
            if !config.enabled_detectors.contains(&id) {
                continue;
            }
            let unit = match id {
                DetectorId::Signature => DetectorUnit::Signature(SignatureDetector::new()),
                DetectorId::Entropy => DetectorUnit::Entropy(EntropyDetector::new()),
                DetectorId::Pii => DetectorUnit::Pii(PiiDetector::new()),
                DetectorId::Similarity => DetectorUnit::Similarity(SimilarityDetector::new(
                    Arc::clone(&externals.embedder),
                    Arc::clone(&externals.index),
                    Arc::clone(&similarity_cache),
                    config.similarity_k,
                    config.similarity_threshold,
                )),
            };
            units.push(Arc::new(unit));
        }

        let pool = match WorkerPool::try_new(PoolConfig {
            slots: config.worker_pool_size,
            admission_timeout: config.admission_timeout,
            backpressure: config.backpressure,
        }) {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("worker pool unavailable ({e}); detectors will run sequentially");
                None
            }
        };

        let aggregator = Aggregator::new(config.detector_weights.clone());
        let decision = DecisionEngine::new(
            config.low_threshold,
            config.high_threshold,
            config.always_block.clone(),
        );
        let escalation = EscalationClient::new(
            Arc::clone(&externals.verifier),
            VerificationPolicy::default(),
        );
        let mitigation = MitigationEngine::new(
            config.strategy_tier,
            config.high_severity.clone(),
            Arc::clone(&externals.audit),
        );

        info!(
            detectors = units.len(),
            pool = pool.is_some(),
            tier = ?config.strategy_tier,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            units,
            pattern_cache,
            similarity_cache,
            pool,
            aggregator,
            decision,
            escalation,
            mitigation,
            metrics: externals.metrics,
            fast_latency: PathLatency::default(),
            deep_latency: PathLatency::default(),
        })
    }

    /// Screens one piece of content, returning the mitigation action.
    ///
    /// This is the single synchronous entry point of the pipeline. The
    /// expensive stage (detector fan-out + aggregation) is memoized in the
    /// pattern cache under single-flight; decision, escalation, and
    /// mitigation always re-run because they depend on live configuration,
    /// remaining budget, and rollback state.
    pub async fn screen(&self, request: DetectionRequest) -> Result<MitigationAction> {
        let started = Instant::now();
        debug!(request = %request.id, bytes = request.content.len(), "screening");

        let fast_budget = match request.options.deadline {
            Some(cap) => self.config.fast_path_deadline.min(cap),
            None => self.config.fast_path_deadline,
        };

        let key = Self::pattern_key(&request);
        let units = self.active_units(&request.options);

        let mut aggregated = self
            .pattern_cache
            .get_or_compute(key, || {
                self.compute_aggregate(&request, &units, started, fast_budget)
            })
            .await?;
        // A cache hit carries the id of the request that computed it.
        aggregated.request_id = request.id;

        if aggregated.partial {
            // A partial vote reflects transient load, not the content; it is
            // shared with the current stampede but must not be re-served.
            self.pattern_cache.invalidate(&key);
        }

        let verdict = self.decision.fast_eval(&aggregated, request.options.threshold);
        let verdict = if verdict.outcome == Outcome::Escalate {
            self.escalate(&request, &aggregated, started).await
        } else {
            verdict
        };

        self.record_latency(&verdict, started.elapsed());
        let action = self.mitigation.apply(&verdict, &request);
        Ok(action)
    }

    /// Undoes a reversible mitigation, returning the restored content.
    pub fn rollback(&self, token: &Uuid) -> Result<String> {
        self.mitigation.rollback(token)
    }

    /// Snapshot of pipeline health.
    pub fn stats(&self) -> GatewayStats {
        let pattern = self.pattern_cache.metrics();
        let similarity = self.similarity_cache.metrics();
        let hits = pattern.hits + similarity.hits;
        let lookups = hits + pattern.misses + similarity.misses;

        GatewayStats {
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            pattern_cache: pattern,
            similarity_cache: similarity,
            pool_utilization: self.pool.as_ref().map(WorkerPool::utilization).unwrap_or(0.0),
            avg_fast_latency: self.fast_latency.average(),
            avg_deep_latency: self.deep_latency.average(),
        }
    }

    /// Drops every cached result. Call when signature corpora or policies
    /// change and previous results are suspect.
    pub fn invalidate_caches(&self) {
        self.pattern_cache.invalidate_all();
        self.similarity_cache.invalidate_all();
    }

    /// Spawns the periodic TTL sweeper for both caches.
    pub fn spawn_maintenance(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pattern = Arc::clone(&self.pattern_cache);
        let similarity = Arc::clone(&self.similarity_cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pattern.sweep();
                similarity.sweep();
            }
        })
    }

    /// Pattern-cache key: a digest of the raw content. A request that
    /// narrows the detector set screens a different effective pipeline, so
    /// the narrowed set is folded into the digest to keep those results
    /// apart. Threshold and deadline overrides do not change the aggregate
    /// and stay out of the key.
    fn pattern_key(request: &DetectionRequest) -> palisade_cache::CacheKey {
        match &request.options.enabled_detectors {
            None => content_key(request.content.as_bytes()),
            Some(narrowed) => {
                let mut ids: Vec<String> = narrowed.iter().map(|id| id.to_string()).collect();
                ids.sort_unstable();
                let mut tagged = request.content.clone().into_bytes();
                tagged.push(0);
                tagged.extend_from_slice(ids.join(",").as_bytes());
                content_key(&tagged)
            }
        }
    }

    fn active_units(&self, options: &ScreenOptions) -> Vec<Arc<DetectorUnit>> {
        match &options.enabled_detectors {
            Some(narrowed) => self
                .units
                .iter()
                .filter(|unit| narrowed.contains(&unit.id()))
                .cloned()
                .collect(),
            None => self.units.clone(),
        }
    }

    /// Runs the detector fan-out and folds the vote. This is the stage the
    /// pattern cache memoizes.
    async fn compute_aggregate(
        &self,
        request: &DetectionRequest,
        units: &[Arc<DetectorUnit>],
        started: Instant,
        budget: Duration,
    ) -> Result<AggregatedResult> {
        let deadline = budget.saturating_sub(started.elapsed());
        let content: Arc<str> = Arc::from(request.content.as_str());
        let metadata = Arc::new(request.metadata.clone());

        let report = match &self.pool {
            Some(pool) => {
                match pool
                    .fan_out(units, Arc::clone(&content), Arc::clone(&metadata), deadline)
                    .await
                {
                    Ok(report) => report,
                    Err(PoolError::Saturated { .. }) if self.config.sequential_fallback => {
                        warn!(request = %request.id, "pool saturated; falling back to sequential execution");
                        self.metrics.observe("pool_saturation_fallbacks", 1.0, &[]);
                        WorkerPool::run_sequential(
                            units,
                            &request.content,
                            &request.metadata,
                            deadline,
                        )
                        .await
                    }
                    Err(e) => return Err(GatewayError::Pool(e)),
                }
            }
            None => {
                WorkerPool::run_sequential(units, &request.content, &request.metadata, deadline)
                    .await
            }
        };

        for failure in &report.failures {
            warn!(request = %request.id, %failure, "detector excluded from vote");
            let detector = failure.detector.to_string();
            self.metrics
                .observe("detector_failures", 1.0, &[("detector", detector.as_str())]);
        }

        let expected: Vec<DetectorCategory> = units.iter().map(|u| u.category()).collect();
        Ok(self
            .aggregator
            .fold(request.id, report.results, &expected, report.partial))
    }

    /// Runs the deep path for an ambiguous fast-path verdict.
    async fn escalate(
        &self,
        request: &DetectionRequest,
        aggregated: &AggregatedResult,
        started: Instant,
    ) -> Verdict {
        let remaining = self
            .config
            .deep_path_deadline
            .saturating_sub(started.elapsed());

        let claim = format!(
            "{}\n---\nfast-path evidence: score {:.3}, category {}, confidence {:.3}, partial {}",
            request.content,
            aggregated.score,
            aggregated.category,
            aggregated.confidence,
            aggregated.partial,
        );

        match self.escalation.verify_claim(&claim, remaining).await {
            Ok(result) => self.decision.deep_verdict(&result, aggregated),
            Err(e) => self.decision.escalation_failed(
                self.config.escalation_failure_policy,
                &e.to_string(),
                aggregated,
            ),
        }
    }

    fn record_latency(&self, verdict: &Verdict, elapsed: Duration) {
        match verdict.path {
            DecisionPath::Fast => self.fast_latency.record(elapsed),
            DecisionPath::Deep => self.deep_latency.record(elapsed),
        }
        let path = match verdict.path {
            DecisionPath::Fast => "fast",
            DecisionPath::Deep => "deep",
        };
        self.metrics.observe(
            "screen_latency_ms",
            elapsed.as_secs_f64() * 1000.0,
            &[("path", path)],
        );
    }
}
