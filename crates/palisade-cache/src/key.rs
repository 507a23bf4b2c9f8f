//! Cache key derivation for the two cache variants.
//!
//! The pattern cache keys on a SHA-256 digest of the raw content. The
//! similarity cache keys on a digest of a deterministic sparse sample of the
//! content embedding plus the query parameters `(k, threshold)`, so that the
//! same lookup against the vector index maps to the same key without hashing
//! the full vector.

use sha2::{Digest, Sha256};
use std::fmt;

/// Sampling stride for similarity keys: every 8th embedding component is
/// hashed.
///
/// Hashing 1-in-8 components trades a small, bounded chance of key collision
/// between near-duplicate embeddings for an 8x reduction in hashing work per
/// lookup. A collision only re-serves a cached result for a near-identical
/// query; it is an accuracy/performance tradeoff, not a correctness
/// guarantee.
pub const EMBED_SAMPLE_STRIDE: usize = 8;

/// A 256-bit cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Raw digest bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Derives the pattern-cache key: a SHA-256 digest of the raw content.
pub fn content_key(content: &[u8]) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(content);
    CacheKey(hasher.finalize().into())
}

/// Derives the similarity-cache key from a sparse sample of `embedding`
/// together with the query parameters.
///
/// Two lookups share a key only when the sampled components, `k`, and
/// `threshold` all agree, so changing either query parameter never re-serves
/// a result computed for the other.
pub fn similarity_key(embedding: &[f32], k: usize, threshold: f64) -> CacheKey {
    let mut hasher = Sha256::new();
    for component in embedding.iter().step_by(EMBED_SAMPLE_STRIDE) {
        hasher.update(component.to_le_bytes());
    }
    hasher.update((k as u64).to_le_bytes());
    hasher.update(threshold.to_le_bytes());
    CacheKey(hasher.finalize().into())
}
