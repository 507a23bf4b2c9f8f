//! The shared screened-content result cache.
//!
//! ## Design
//!
//! Entries live in a bounded LRU list with a per-cache TTL. Expiry is lazy on
//! read, with [`ContentCache::sweep`] available for periodic proactive
//! removal. All mutation happens under a single `parking_lot` mutex whose
//! critical sections never perform I/O or await, so a slow detector
//! computation can never stall unrelated cache reads.
//!
//! ## Stampede control
//!
//! [`ContentCache::get_or_compute`] guarantees at-most-one concurrent
//! computation per key. The first caller to register becomes the leader and
//! computes; later callers subscribe to a `watch` channel and reuse the
//! published value. A leader that fails (or is dropped mid-computation)
//! closes the channel, and waiters fall back to computing directly - the
//! cache is never left with a torn entry either way.
//!
//! ## Integrity
//!
//! Values are consistency-checked on every read via [`CacheValue`]. An entry
//! that fails the check is evicted and reported as a miss, never served.

use crate::key::CacheKey;
use crate::lru::LruList;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Contract for cacheable values.
///
/// `is_consistent` is the read-time integrity check: a value failing it is
/// treated as corruption (evicted, counted, served as a miss).
/// `approx_bytes` feeds the resident-memory metric and only needs to be
/// approximately right.
pub trait CacheValue: Clone + Send + Sync + 'static {
    /// Whether the value still satisfies its own invariants.
    fn is_consistent(&self) -> bool {
        true
    }

    /// Approximate heap + inline size of the value in bytes.
    fn approx_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Point-in-time view of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheMetrics {
    /// Reads served from a live entry.
    pub hits: u64,
    /// Reads that found no usable entry.
    pub misses: u64,
    /// Entries dropped by LRU pressure.
    pub evictions: u64,
    /// Entries dropped by TTL expiry (lazy or swept).
    pub expirations: u64,
    /// Entries dropped by a failed consistency check.
    pub corruptions: u64,
    /// Live entry count.
    pub size: usize,
    /// Approximate resident bytes across live entries.
    pub resident_bytes: usize,
}

impl CacheMetrics {
    /// Hit fraction over all completed reads, 0.0 when no reads happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    corruptions: AtomicU64,
    resident_bytes: AtomicUsize,
}

/// Keyed result cache with LRU + TTL eviction and single-flight computation.
///
/// Two instances back the pipeline: the pattern cache (keyed on a digest of
/// raw content) and the similarity cache (keyed on a sampled embedding
/// digest, see [`crate::similarity_key`]). Both share this contract.
pub struct ContentCache<V: CacheValue> {
    name: &'static str,
    ttl: Duration,
    inner: Mutex<LruList<CacheKey, V>>,
    in_flight: Mutex<HashMap<CacheKey, watch::Receiver<Option<V>>>>,
    counters: Counters,
}

impl<V: CacheValue> ContentCache<V> {
    /// Creates a cache bounded at `max_size` entries with the given TTL.
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is 0.
    pub fn new(name: &'static str, max_size: usize, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            inner: Mutex::new(LruList::new(max_size)),
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Looks up `key`, marking the entry most recently used on a hit.
    ///
    /// Entries past their TTL or failing the consistency check are evicted
    /// and reported as misses.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let created = match inner.peek_created(key) {
            Some(created) => created,
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if now.duration_since(created) > self.ttl {
            if let Some(value) = inner.remove(key) {
                self.release_bytes(&value);
            }
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let value = inner.touch(key, now).cloned();
        drop(inner);

        match value {
            Some(value) if value.is_consistent() => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(value) => {
                // Never serve a corrupt entry; drop it and miss.
                warn!(cache = self.name, key = %key, "corrupt cache entry evicted");
                self.inner.lock().remove(key);
                self.release_bytes(&value);
                self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts `value` under `key`, evicting the least recently used entry
    /// if the cache is at capacity. Overwrites reset recency and TTL.
    pub fn put(&self, key: CacheKey, value: V) {
        let now = Instant::now();
        let added = value.approx_bytes();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.remove(&key) {
            self.release_bytes(&old);
        }
        let evicted = inner.insert(key, value, now);
        drop(inner);

        self.counters.resident_bytes.fetch_add(added, Ordering::Relaxed);
        if let Some((_, old)) = evicted {
            self.release_bytes(&old);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes a single entry. Returns whether one was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.inner.lock().remove(key);
        match removed {
            Some(value) => {
                self.release_bytes(&value);
                true
            }
            None => false,
        }
    }

    /// Drops every entry. Used when the underlying signature corpus or
    /// policies change and all previous results are suspect.
    pub fn invalidate_all(&self) -> usize {
        let dropped = self.inner.lock().clear();
        self.counters.resident_bytes.store(0, Ordering::Relaxed);
        debug!(cache = self.name, dropped, "cache invalidated");
        dropped
    }

    /// Proactively removes all TTL-expired entries, returning how many were
    /// dropped. Safe to call concurrently with `get`/`put`; intended to run
    /// on a fixed interval.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let cutoff = match now.checked_sub(self.ttl) {
            Some(cutoff) => cutoff,
            None => return 0,
        };

        let mut inner = self.inner.lock();
        let expired = inner.created_before(cutoff);
        for key in &expired {
            if let Some(value) = inner.remove(key) {
                self.release_bytes(&value);
            }
        }
        drop(inner);

        let dropped = expired.len();
        if dropped > 0 {
            self.counters
                .expirations
                .fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(cache = self.name, dropped, "ttl sweep");
        }
        dropped
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache counters.
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            corruptions: self.counters.corruptions.load(Ordering::Relaxed),
            size: self.len(),
            resident_bytes: self.counters.resident_bytes.load(Ordering::Relaxed),
        }
    }

    /// Returns the cached value for `key`, or runs `compute` with the
    /// guarantee that at most one computation per key is in flight.
    ///
    /// The leader caches and publishes its result; concurrent callers wait
    /// on the in-flight computation and reuse the value. If the leader
    /// fails, waiters compute directly rather than erroring on its behalf -
    /// a failed computation never poisons the key.
    pub async fn get_or_compute<E, Fut>(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Fut,
    ) -> Result<V, E>
    where
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        enum Role<V> {
            Leader(watch::Sender<Option<V>>),
            Follower(watch::Receiver<Option<V>>),
        }

        let role = {
            let mut in_flight = self.in_flight.lock();
            // Re-check under the registry lock: a leader may have published
            // between the miss above and this point.
            if let Some(value) = self.get(&key) {
                return Ok(value);
            }
            match in_flight.get(&key) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(key, rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let result = compute().await;
                match result {
                    Ok(value) => {
                        // Publish before deregistering so no window exists in
                        // which a new caller sees neither cache entry nor
                        // in-flight computation.
                        self.put(key, value.clone());
                        let _ = tx.send(Some(value.clone()));
                        self.in_flight.lock().remove(&key);
                        Ok(value)
                    }
                    Err(e) => {
                        self.in_flight.lock().remove(&key);
                        // Dropping `tx` closes the channel; waiters fall back.
                        Err(e)
                    }
                }
            }
            Role::Follower(mut rx) => {
                loop {
                    let published = rx.borrow().clone();
                    if let Some(value) = published {
                        return Ok(value);
                    }
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
                debug!(cache = self.name, key = %key, "in-flight leader failed, computing directly");
                let value = compute().await?;
                self.put(key, value.clone());
                Ok(value)
            }
        }
    }

    fn release_bytes(&self, value: &V) {
        let bytes = value.approx_bytes();
        let mut current = self.counters.resident_bytes.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.counters.resident_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

impl<V: CacheValue> std::fmt::Debug for ContentCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("size", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::content_key;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    impl CacheValue for String {
        fn approx_bytes(&self) -> usize {
            self.len()
        }
    }

    fn cache(max: usize, ttl_ms: u64) -> ContentCache<String> {
        ContentCache::new("test", max, Duration::from_millis(ttl_ms))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = cache(8, 10_000);
        let key = content_key(b"hello");
        cache.put(key, "value".to_string());
        assert_eq!(cache.get(&key), Some("value".to_string()));
    }

    #[test]
    fn test_miss_on_absent_key() {
        let cache = cache(8, 10_000);
        assert_eq!(cache.get(&content_key(b"nope")), None);
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let cache = cache(4, 10_000);
        for i in 0..10u32 {
            cache.put(content_key(&i.to_le_bytes()), format!("v{i}"));
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.metrics().evictions, 6);
    }

    #[test]
    fn test_lru_entry_evicted_first() {
        let cache = cache(3, 10_000);
        let (a, b, c, d) = (
            content_key(b"a"),
            content_key(b"b"),
            content_key(b"c"),
            content_key(b"d"),
        );
        cache.put(a, "a".into());
        cache.put(b, "b".into());
        cache.put(c, "c".into());

        // Touch "a"; "b" is now least recently used.
        assert!(cache.get(&a).is_some());
        cache.put(d, "d".into());

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
        assert!(cache.get(&d).is_some());
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let cache = cache(8, 10);
        let key = content_key(b"short-lived");
        cache.put(key, "v".into());
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(cache.get(&key), None);
        let metrics = cache.metrics();
        assert_eq!(metrics.expirations, 1);
        assert_eq!(metrics.size, 0);
    }

    #[test]
    fn test_overwrite_resets_recency_and_value() {
        let cache = cache(2, 10_000);
        let (a, b, c) = (content_key(b"a"), content_key(b"b"), content_key(b"c"));
        cache.put(a, "a1".into());
        cache.put(b, "b".into());

        // Overwriting "a" makes "b" the LRU entry.
        cache.put(a, "a2".into());
        cache.put(c, "c".into());

        assert_eq!(cache.get(&a), Some("a2".to_string()));
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn test_sweep_drops_expired_entries() {
        let cache = cache(8, 10);
        cache.put(content_key(b"1"), "1".into());
        cache.put(content_key(b"2"), "2".into());
        std::thread::sleep(Duration::from_millis(25));
        cache.put(content_key(b"3"), "3".into());

        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let cache = cache(8, 10_000);
        let key = content_key(b"gone");
        cache.put(key, "v".into());
        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn test_resident_bytes_tracks_values() {
        let cache = cache(8, 10_000);
        let key = content_key(b"k");
        cache.put(key, "x".repeat(100));
        assert_eq!(cache.metrics().resident_bytes, 100);
        cache.invalidate(&key);
        assert_eq!(cache.metrics().resident_bytes, 0);
    }

    #[derive(Clone)]
    struct Checked {
        ok: bool,
    }

    impl CacheValue for Checked {
        fn is_consistent(&self) -> bool {
            self.ok
        }
    }

    #[test]
    fn test_corrupt_entry_served_as_miss_and_evicted() {
        let cache: ContentCache<Checked> = ContentCache::new("t", 8, Duration::from_secs(60));
        let key = content_key(b"bad");
        cache.put(key, Checked { ok: false });

        assert!(cache.get(&key).is_none());
        let metrics = cache.metrics();
        assert_eq!(metrics.corruptions, 1);
        assert_eq!(metrics.size, 0);
    }

    #[tokio::test]
    async fn test_get_or_compute_caches_result() {
        let cache = cache(8, 10_000);
        let key = content_key(b"computed");

        let value: Result<String, ()> = cache
            .get_or_compute(key, || async { Ok("fresh".to_string()) })
            .await;
        assert_eq!(value.unwrap(), "fresh");
        assert_eq!(cache.get(&key), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_get_or_compute_error_not_cached() {
        let cache = cache(8, 10_000);
        let key = content_key(b"failing");

        let result: Result<String, &str> =
            cache.get_or_compute(key, || async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));
        assert_eq!(cache.get(&key), None);

        // A later computation succeeds normally.
        let result: Result<String, &str> = cache
            .get_or_compute(key, || async { Ok("ok".to_string()) })
            .await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_stampede_runs_exactly_one_computation() {
        let cache = Arc::new(cache(8, 10_000));
        let key = content_key(b"stampede");
        let computations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            let computations = Arc::clone(&computations);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute::<(), _>(key, || async {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("expensive".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "expensive");
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }
}
