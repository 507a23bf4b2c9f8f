//! # Palisade Cache - Screened-Content Result Cache
//!
//! Keyed result cache that makes repeated screening of the same content
//! cheap. Two instances back the detection pipeline with one shared
//! contract:
//!
//! | Variant | Key derivation | Memoizes |
//! |---------|---------------|----------|
//! | Pattern cache | SHA-256 of raw content | Aggregated detector verdict data |
//! | Similarity cache | SHA-256 of sampled embedding + `(k, threshold)` | Vector-index match result |
//!
//! ## Guarantees
//!
//! - Bounded: never more than `max_size` entries, classic LRU eviction with
//!   O(1) lookup and touch.
//! - Fresh: no entry is served past its TTL; expiry is lazy on read plus an
//!   explicit [`ContentCache::sweep`] for interval-driven cleanup.
//! - Uncorrupted: values are integrity-checked on read and evicted rather
//!   than served when the check fails.
//! - Stampede-safe: [`ContentCache::get_or_compute`] runs at most one
//!   computation per key at a time; concurrent callers wait and reuse the
//!   result.
//!
//! ## Concurrency
//!
//! The cache is shared by all pipeline invocations. Internal locking uses
//! short `parking_lot` critical sections that never block on I/O or hold
//! across an await point, so no slow detector computation can stall
//! unrelated reads.

mod cache;
mod key;
mod lru;

pub use cache::{CacheMetrics, CacheValue, ContentCache};
pub use key::{content_key, similarity_key, CacheKey, EMBED_SAMPLE_STRIDE};
