//! Embedding cache
//!
//! Caches generated vectors keyed by a content hash so identical texts never
//! hit the provider twice while the entry is fresh. The key includes the
//! model name: switching models invalidates everything without a flush.
//!
//! Thread-safe via interior mutability using parking_lot::Mutex.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::provider::{EmbedPriority, Embedder, EmbedderStatus};
use crate::error::Result;
use crate::metrics::SearchMetrics;

/// Default cache capacity (entries)
const DEFAULT_CAPACITY: usize = 10_000;

/// Default entry lifetime: 30 days
const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Cache key for an embedding: hex SHA-256 of `model + ":" + text`.
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Vector lookup by cache key.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>>;
    async fn put(&self, key: &str, vector: Vec<f32>) -> Result<()>;
}

/// Cache that never stores anything. Disables caching without branching
/// at the call sites.
#[derive(Debug, Default)]
pub struct NoopCache;

#[async_trait]
impl EmbeddingCache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _vector: Vec<f32>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: EmbeddingCache + ?Sized> EmbeddingCache for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, vector: Vec<f32>) -> Result<()> {
        (**self).put(key, vector).await
    }
}

struct Entry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// In-memory LRU cache with per-entry TTL.
pub struct TtlLruCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl TtlLruCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TtlLruCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[async_trait]
impl EmbeddingCache for TtlLruCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                Ok(Some(entry.vector.clone()))
            }
            Some(_) => {
                // Expired, drop it so it stops occupying a slot
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, vector: Vec<f32>) -> Result<()> {
        self.entries.lock().put(
            key.to_string(),
            Entry {
                vector,
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }
}

/// Embedder wrapper that consults the cache before the provider.
///
/// Misses are batched into a single provider call. The cache itself is
/// best-effort on both sides: a failed read counts as a miss and a failed
/// write is logged, never surfaced.
pub struct CachedEmbedder<E, C> {
    inner: E,
    cache: C,
    metrics: std::sync::Arc<SearchMetrics>,
}

impl<E: Embedder, C: EmbeddingCache> CachedEmbedder<E, C> {
    pub fn new(inner: E, cache: C) -> Self {
        Self {
            inner,
            cache,
            metrics: std::sync::Arc::new(SearchMetrics::new()),
        }
    }

    /// Report hit/miss counts to a shared metrics instance.
    pub fn with_metrics(mut self, metrics: std::sync::Arc<SearchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Embedder, C: EmbeddingCache> Embedder for CachedEmbedder<E, C> {
    async fn embed(&self, texts: Vec<String>, priority: EmbedPriority) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = self.inner.model().to_string();
        let keys: Vec<String> = texts.iter().map(|t| cache_key(&model, t)).collect();

        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            // A failing cache read is a miss; the cache is advisory and
            // must never take the provider down with it.
            let cached = match self.cache.get(key).await {
                Ok(hit) => hit,
                Err(e) => {
                    warn!(error = %e, "embedding cache read failed");
                    None
                }
            };
            match cached {
                Some(vector) => results.push(Some(vector)),
                None => {
                    results.push(None);
                    miss_indices.push(i);
                    miss_texts.push(texts[i].clone());
                }
            }
        }

        self.metrics
            .record_cache_hits((texts.len() - miss_texts.len()) as u64);
        self.metrics.record_cache_misses(miss_texts.len() as u64);

        if !miss_texts.is_empty() {
            debug!(
                hits = texts.len() - miss_texts.len(),
                misses = miss_texts.len(),
                "embedding cache lookup"
            );
            let fresh = self.inner.embed(miss_texts, priority).await?;
            for (slot, vector) in miss_indices.into_iter().zip(fresh) {
                if let Err(e) = self.cache.put(&keys[slot], vector.clone()).await {
                    warn!(error = %e, "embedding cache write failed");
                }
                results[slot] = Some(vector);
            }
        }

        // Every slot is filled: hits up front, misses just above
        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn check_status(&self) -> Result<EmbedderStatus> {
        self.inner.check_status().await
    }
}
