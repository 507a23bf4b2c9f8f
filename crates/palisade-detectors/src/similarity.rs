//! Vector-similarity matcher.
//!
//! Embeds the content, consults the similarity cache, and only on a miss
//! queries the external nearest-neighbor index. The external engine and the
//! embedding function are collaborator traits - this crate never implements
//! a vector index itself.
//!
//! Cache keys are derived from a sparse sample of the embedding plus the
//! query parameters (see [`palisade_cache::similarity_key`]), so repeated
//! screening of near-identical content skips both the index round-trip and
//! most of the hashing work.

use crate::result::{DetectorCategory, DetectorError, DetectorId, DetectorResult, Metadata};
use async_trait::async_trait;
use palisade_cache::{similarity_key, ContentCache};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A nearest-neighbor match returned by the external index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMatch {
    /// Identifier of the indexed item.
    pub id: String,
    /// Similarity in `0.0..=1.0` (1.0 = identical).
    pub score: f64,
    /// Arbitrary metadata attached to the indexed item.
    pub metadata: Metadata,
}

/// External embedding capability.
///
/// Must be deterministic: the similarity cache keys on the embedding, so
/// the same content must always embed to the same vector.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embeds `content` into a fixed-dimension vector.
    async fn embed(&self, content: &str) -> Result<Vec<f32>, DetectorError>;
}

/// External vector-similarity capability (nearest-neighbor index).
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Returns up to `k` matches with similarity at or above `threshold`.
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        threshold: f64,
    ) -> Result<Vec<IndexMatch>, DetectorError>;
}

/// Similarity scorer backed by the external index, with a result cache.
pub struct SimilarityDetector {
    embedder: Arc<dyn TextEmbedder>,
    index: Arc<dyn SimilaritySearch>,
    cache: Arc<ContentCache<DetectorResult>>,
    k: usize,
    threshold: f64,
}

impl SimilarityDetector {
    /// Creates the detector.
    ///
    /// `k` and `threshold` are fixed per instance; they participate in the
    /// cache key so reconfigured instances never cross-read results.
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        index: Arc<dyn SimilaritySearch>,
        cache: Arc<ContentCache<DetectorResult>>,
        k: usize,
        threshold: f64,
    ) -> Self {
        Self {
            embedder,
            index,
            cache,
            k,
            threshold,
        }
    }

    /// Scores `content` by its best match in the external index.
    ///
    /// The cached result is reused under stampede control: concurrent
    /// lookups that sample to the same key share one index query.
    pub async fn evaluate(&self, content: &str) -> Result<DetectorResult, DetectorError> {
        let embedding = self.embedder.embed(content).await?;
        let key = similarity_key(&embedding, self.k, self.threshold);

        self.cache
            .get_or_compute(key, || async {
                let matches = self
                    .index
                    .search(&embedding, self.k, self.threshold)
                    .await?;
                debug!(matches = matches.len(), %key, "similarity index queried");
                Ok(Self::fold_matches(&matches))
            })
            .await
    }

    fn fold_matches(matches: &[IndexMatch]) -> DetectorResult {
        let best = matches
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score));

        match best {
            Some(top) => DetectorResult {
                detector: DetectorId::Similarity,
                matched: true,
                score: top.score.clamp(0.0, 1.0),
                category: DetectorCategory::Similarity,
                detail: format!("{} index matches, best '{}'", matches.len(), top.id),
                latency: Duration::ZERO,
            },
            None => DetectorResult::clean(DetectorId::Similarity, DetectorCategory::Similarity),
        }
    }
}
