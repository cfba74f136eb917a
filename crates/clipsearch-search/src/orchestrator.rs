//! Hybrid search orchestration
//!
//! One query flows through three stages:
//!
//! 1. Lexical retrieval and query embedding run concurrently. The embedding
//!    leg has its own deadline so a slow provider never holds up the page.
//! 2. Stored vectors for the candidate pool are fetched and blended in.
//! 3. The pool is reordered and truncated to the requested limit.
//!
//! The lexical index is load-bearing: if it fails, the query fails. Every
//! other failure degrades to lexical-only results with `used_fallback` set,
//! and feeds the [`FallbackController`] so a persistently broken embedding
//! path stops being attempted at all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use clipsearch_core::{Candidate, RankedClip, SearchRequest, SearchResults, SearchResultsMeta};

use crate::embeddings::{EmbedPriority, Embedder};
use crate::error::Result;
use crate::fallback::FallbackController;
use crate::lexical::LexicalIndex;
use crate::metrics::SearchMetrics;
use crate::rerank::{candidate_pool_size, rerank, RerankWeights};
use crate::vector::VectorIndex;

/// Default deadline for the embedding leg of a query
const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(2);

/// Hybrid searcher over a lexical index, a vector store and an embedder.
pub struct HybridSearcher<L, V, E> {
    lexical: L,
    vectors: V,
    embedder: E,
    fallback: Arc<FallbackController>,
    metrics: Arc<SearchMetrics>,
    weights: RerankWeights,
    embed_timeout: Duration,
}

impl<L, V, E> HybridSearcher<L, V, E>
where
    L: LexicalIndex,
    V: VectorIndex,
    E: Embedder,
{
    pub fn new(lexical: L, vectors: V, embedder: E) -> Self {
        Self {
            lexical,
            vectors,
            embedder,
            fallback: Arc::new(FallbackController::default()),
            metrics: Arc::new(SearchMetrics::new()),
            weights: RerankWeights::default(),
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<FallbackController>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SearchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_weights(mut self, weights: RerankWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn fallback(&self) -> &Arc<FallbackController> {
        &self.fallback
    }

    pub fn metrics(&self) -> &Arc<SearchMetrics> {
        &self.metrics
    }

    /// Run a hybrid search.
    ///
    /// Fails only when the lexical index is unavailable. Everything past
    /// lexical retrieval degrades instead of failing.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let started = Instant::now();
        let result = self.search_inner(request, started).await;

        match &result {
            Ok(results) => self
                .metrics
                .record_query(results.meta.elapsed_ms, results.meta.used_fallback),
            Err(_) => self.metrics.record_query_error(),
        }

        result
    }

    async fn search_inner(
        &self,
        request: &SearchRequest,
        started: Instant,
    ) -> Result<SearchResults> {
        let pool_size = candidate_pool_size(request.limit);

        // Empty queries have nothing to embed; browse lexically.
        // A degraded controller skips embedding before it is even attempted.
        let attempt_vectors = !request.query.is_empty() && self.fallback.should_attempt();

        let (hits, query_vector) = if attempt_vectors {
            let (lexical_result, embed_result) = tokio::join!(
                self.lexical
                    .search(&request.query, &request.filters, pool_size),
                self.timed_embed(&request.query),
            );
            (lexical_result?, embed_result)
        } else {
            let hits = self
                .lexical
                .search(&request.query, &request.filters, pool_size)
                .await?;
            (hits, None)
        };

        let mut candidates: Vec<Candidate> = hits
            .into_iter()
            .map(|hit| Candidate::lexical(hit.id, hit.score))
            .collect();
        let total_candidates = candidates.len();

        // Fallback is only "used" when the vector path was wanted but
        // unavailable; empty queries are plain lexical browsing.
        let mut used_fallback = attempt_vectors && query_vector.is_none();
        if !attempt_vectors && !request.query.is_empty() {
            used_fallback = true;
        }

        if let Some(ref vector) = query_vector {
            let ids: Vec<_> = candidates.iter().map(|c| c.id.clone()).collect();
            let fetch_started = Instant::now();
            match self.vectors.fetch(&ids).await {
                Ok(stored) => {
                    rerank(vector, &mut candidates, &stored, self.weights);
                }
                Err(e) => {
                    warn!(error = %e, "vector fetch failed, serving lexical order");
                    // The fetch is part of the vector path: a dead store
                    // must trip the controller just like a dead embedder.
                    self.fallback.record_failure(fetch_started.elapsed());
                    used_fallback = true;
                }
            }
        }

        candidates.truncate(request.limit);

        let results = candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| RankedClip {
                id: c.id,
                rank: i + 1,
                score: c.blended,
                degraded: used_fallback || c.distance.is_none(),
            })
            .collect();

        debug!(
            query = %request.query,
            total_candidates,
            used_fallback,
            "search complete"
        );

        Ok(SearchResults {
            query: request.query.clone(),
            results,
            meta: SearchResultsMeta {
                used_fallback,
                total_candidates,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Embed the query under a deadline, reporting the outcome to the
    /// fallback controller. Returns None on any failure.
    async fn timed_embed(&self, query: &str) -> Option<Vec<f32>> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.embed_timeout,
            self.embedder
                .embed_one(query.to_string(), EmbedPriority::Foreground),
        )
        .await;

        let elapsed = started.elapsed();
        match outcome {
            Ok(Ok(vector)) => {
                self.fallback.record_success(elapsed);
                Some(vector)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "query embedding failed");
                self.fallback.record_failure(elapsed);
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.embed_timeout.as_millis() as u64, "query embedding timed out");
                self.fallback.record_failure(elapsed);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use clipsearch_core::{ClipDocument, ItemId, SearchFilters};

    use crate::embeddings::EmbedderStatus;
    use crate::error::SearchError;
    use crate::fallback::{FallbackConfig, HealthState};
    use crate::lexical::LexicalHit;

    struct FakeLexical {
        hits: Vec<LexicalHit>,
        fail: bool,
    }

    impl FakeLexical {
        fn with_hits(entries: &[(&str, f32)]) -> Self {
            Self {
                hits: entries
                    .iter()
                    .map(|(id, score)| LexicalHit {
                        id: ItemId::from(*id),
                        score: *score,
                    })
                    .collect(),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                hits: vec![],
                fail: true,
            }
        }
    }

    #[async_trait]
    impl LexicalIndex for FakeLexical {
        async fn search(
            &self,
            _query: &str,
            _filters: &SearchFilters,
            _size: usize,
        ) -> Result<Vec<LexicalHit>> {
            if self.fail {
                return Err(SearchError::LexicalUnavailable("down".into()));
            }
            Ok(self.hits.clone())
        }

        async fn upsert(&self, _doc: &ClipDocument) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _id: &ItemId) -> Result<()> {
            Ok(())
        }

        async fn bulk_upsert(&self, _docs: &[ClipDocument]) -> Result<()> {
            Ok(())
        }

        async fn ensure_index(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeVectors {
        stored: HashMap<ItemId, Vec<f32>>,
        fail: bool,
    }

    impl FakeVectors {
        fn empty() -> Self {
            Self {
                stored: HashMap::new(),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl VectorIndex for FakeVectors {
        async fn ensure_collection(&self) -> Result<()> {
            Ok(())
        }

        async fn fetch(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, Vec<f32>>> {
            if self.fail {
                return Err(SearchError::VectorStore("down".into()));
            }
            Ok(ids
                .iter()
                .filter_map(|id| self.stored.get(id).map(|v| (id.clone(), v.clone())))
                .collect())
        }

        async fn upsert(&self, _id: &ItemId, _vector: Vec<f32>, _model: &str) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _ids: &[ItemId]) -> Result<()> {
            Ok(())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    struct FakeEmbedder {
        calls: AtomicUsize,
        behavior: EmbedBehavior,
    }

    enum EmbedBehavior {
        Succeed(Vec<f32>),
        Fail,
        Hang,
    }

    impl FakeEmbedder {
        fn succeeding(vector: Vec<f32>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                behavior: EmbedBehavior::Succeed(vector),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                behavior: EmbedBehavior::Fail,
            }
        }

        fn hanging() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                behavior: EmbedBehavior::Hang,
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(
            &self,
            texts: Vec<String>,
            _priority: EmbedPriority,
        ) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                EmbedBehavior::Succeed(v) => Ok(vec![v.clone(); texts.len()]),
                EmbedBehavior::Fail => Err(SearchError::EmbeddingUnavailable("down".into())),
                EmbedBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "fake"
        }

        async fn check_status(&self) -> Result<EmbedderStatus> {
            Ok(EmbedderStatus::healthy("fake"))
        }
    }

    fn request(query: &str, limit: usize) -> SearchRequest {
        SearchRequest::new(query).with_limit(limit)
    }

    #[tokio::test]
    async fn hybrid_path_reranks_with_vectors() {
        let lexical = FakeLexical::with_hits(&[("a", 0.9), ("b", 0.7), ("c", 0.5)]);
        let vectors = FakeVectors {
            stored: HashMap::from([
                (ItemId::from("a"), vec![0.2, 0.98]),
                (ItemId::from("c"), vec![1.0, 0.05]),
            ]),
            fail: false,
        };
        let embedder = FakeEmbedder::succeeding(vec![1.0, 0.0]);

        let searcher = HybridSearcher::new(lexical, vectors, embedder);
        let results = searcher.search(&request("apex", 3)).await.unwrap();

        assert!(!results.meta.used_fallback);
        assert_eq!(results.results[0].id.as_str(), "c");
        assert_eq!(results.results[0].rank, 1);
        assert!(!results.results[0].degraded);
        // b has no vector: marked degraded individually
        let b = results.results.iter().find(|r| r.id.as_str() == "b").unwrap();
        assert!(b.degraded);
    }

    #[tokio::test]
    async fn embedding_failure_degrades_instead_of_failing() {
        let lexical = FakeLexical::with_hits(&[("a", 0.9), ("b", 0.7)]);
        let searcher =
            HybridSearcher::new(lexical, FakeVectors::empty(), FakeEmbedder::failing());

        let results = searcher.search(&request("apex", 2)).await.unwrap();

        assert!(results.meta.used_fallback);
        // Lexical order preserved
        assert_eq!(results.results[0].id.as_str(), "a");
        assert!(results.results.iter().all(|r| r.degraded));
    }

    #[tokio::test]
    async fn embedding_timeout_degrades() {
        let lexical = FakeLexical::with_hits(&[("a", 0.9)]);
        let searcher = HybridSearcher::new(lexical, FakeVectors::empty(), FakeEmbedder::hanging())
            .with_embed_timeout(Duration::from_millis(20));

        let results = searcher.search(&request("apex", 1)).await.unwrap();
        assert!(results.meta.used_fallback);
    }

    #[tokio::test]
    async fn lexical_failure_fails_the_query() {
        let searcher = HybridSearcher::new(
            FakeLexical::failing(),
            FakeVectors::empty(),
            FakeEmbedder::succeeding(vec![1.0, 0.0]),
        );

        let result = searcher.search(&request("apex", 10)).await;
        assert!(matches!(result, Err(SearchError::LexicalUnavailable(_))));
        assert_eq!(searcher.metrics().snapshot().failed_queries, 1);
    }

    #[tokio::test]
    async fn degraded_controller_skips_embedding_entirely() {
        let fallback = Arc::new(FallbackController::new(FallbackConfig {
            min_samples: 1,
            cooldown: Duration::from_secs(3600),
            ..Default::default()
        }));
        fallback.record_failure(Duration::from_millis(1));

        let embedder = FakeEmbedder::succeeding(vec![1.0, 0.0]);
        let searcher = HybridSearcher::new(
            FakeLexical::with_hits(&[("a", 0.9)]),
            FakeVectors::empty(),
            embedder,
        )
        .with_fallback(fallback);

        let results = searcher.search(&request("apex", 1)).await.unwrap();

        assert!(results.meta.used_fallback);
        assert_eq!(
            searcher.embedder.calls.load(Ordering::SeqCst),
            0,
            "embedder must not be called while degraded"
        );
    }

    #[tokio::test]
    async fn vector_store_failure_degrades() {
        let vectors = FakeVectors {
            stored: HashMap::new(),
            fail: true,
        };
        let searcher = HybridSearcher::new(
            FakeLexical::with_hits(&[("a", 0.9)]),
            vectors,
            FakeEmbedder::succeeding(vec![1.0, 0.0]),
        );

        let results = searcher.search(&request("apex", 1)).await.unwrap();
        assert!(results.meta.used_fallback);
        assert_eq!(results.results.len(), 1);
    }

    #[tokio::test]
    async fn persistent_vector_failures_trip_the_controller() {
        let fallback = Arc::new(FallbackController::new(FallbackConfig {
            min_samples: 4,
            cooldown: Duration::from_secs(3600),
            ..Default::default()
        }));
        let vectors = FakeVectors {
            stored: HashMap::new(),
            fail: true,
        };
        let searcher = HybridSearcher::new(
            FakeLexical::with_hits(&[("a", 0.9)]),
            vectors,
            FakeEmbedder::succeeding(vec![1.0, 0.0]),
        )
        .with_fallback(Arc::clone(&fallback));

        // Each query records one embed success and one fetch failure, so
        // the failure rate sits at the 0.5 threshold once min_samples fill.
        for _ in 0..4 {
            let results = searcher.search(&request("apex", 1)).await.unwrap();
            assert!(results.meta.used_fallback);
        }

        assert_eq!(fallback.state(), HealthState::Degraded);
        // The last two queries skipped the embedder entirely
        assert_eq!(searcher.embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_query_browses_without_fallback_flag() {
        let searcher = HybridSearcher::new(
            FakeLexical::with_hits(&[("a", 1.0)]),
            FakeVectors::empty(),
            FakeEmbedder::failing(),
        );

        let results = searcher.search(&request("", 5)).await.unwrap();
        assert!(!results.meta.used_fallback);
    }

    #[tokio::test]
    async fn results_are_truncated_to_limit() {
        let lexical = FakeLexical::with_hits(&[("a", 0.9), ("b", 0.8), ("c", 0.7)]);
        let searcher = HybridSearcher::new(
            lexical,
            FakeVectors::empty(),
            FakeEmbedder::succeeding(vec![1.0, 0.0]),
        );

        let results = searcher.search(&request("apex", 2)).await.unwrap();
        assert_eq!(results.results.len(), 2);
        assert_eq!(results.meta.total_candidates, 3);
    }
}
