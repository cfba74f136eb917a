//! Lightweight operational counters
//!
//! Plain atomics, readable at any time via [`SearchMetrics::snapshot`].
//! Emission (logs, status command) is up to the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the query and backfill paths.
#[derive(Debug, Default)]
pub struct SearchMetrics {
    queries: AtomicU64,
    degraded_queries: AtomicU64,
    failed_queries: AtomicU64,
    total_query_ms: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fallback_transitions: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_dead_lettered: AtomicU64,
    embeddings_generated: AtomicU64,
    coverage_embedded: AtomicU64,
    coverage_missing: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub degraded_queries: u64,
    pub failed_queries: u64,
    pub avg_query_ms: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fallback_transitions: u64,
    pub jobs_completed: u64,
    pub jobs_dead_lettered: u64,
    pub embeddings_generated: u64,
    pub coverage_embedded: u64,
    pub coverage_missing: u64,
}

impl SearchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self, elapsed_ms: u64, used_fallback: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.total_query_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        if used_fallback {
            self.degraded_queries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_query_error(&self) {
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hits(&self, count: u64) {
        self.cache_hits.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_cache_misses(&self, count: u64) {
        self.cache_misses.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fallback_transition(&self) {
        self.fallback_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_dead_lettered(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_embedding_generated(&self) {
        self.embeddings_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_coverage(&self, embedded: u64, missing: u64) {
        self.coverage_embedded.store(embedded, Ordering::Relaxed);
        self.coverage_missing.store(missing, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let queries = self.queries.load(Ordering::Relaxed);
        let total_ms = self.total_query_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            queries,
            degraded_queries: self.degraded_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            avg_query_ms: if queries > 0 { total_ms / queries } else { 0 },
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            fallback_transitions: self.fallback_transitions.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
            embeddings_generated: self.embeddings_generated.load(Ordering::Relaxed),
            coverage_embedded: self.coverage_embedded.load(Ordering::Relaxed),
            coverage_missing: self.coverage_missing.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_queries() {
        let metrics = SearchMetrics::new();
        metrics.record_query(30, false);
        metrics.record_query(10, true);

        let snap = metrics.snapshot();
        assert_eq!(snap.queries, 2);
        assert_eq!(snap.degraded_queries, 1);
        assert_eq!(snap.avg_query_ms, 20);
    }

    #[test]
    fn empty_metrics_have_zero_average() {
        assert_eq!(SearchMetrics::new().snapshot().avg_query_ms, 0);
    }
}
