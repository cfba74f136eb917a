//! clipsearch-search - Hybrid lexical + vector search over a clip corpus
//!
//! Retrieval is two-stage: a keyword index produces the candidate pool, and
//! stored embeddings re-rank it by similarity to the query vector. The
//! lexical leg is load-bearing; everything vector-side degrades instead of
//! failing, under the control of a [`fallback::FallbackController`].
//!
//! # Example
//!
//! ```ignore
//! use clipsearch_search::{
//!     HybridSearcher, LexicalConfig, OpenSearchIndex, OpenAiConfig, OpenAiEmbedder,
//!     QdrantVectorIndex, VectorConfig,
//! };
//! use clipsearch_core::SearchRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let lexical = OpenSearchIndex::new(LexicalConfig::default())?;
//!     let vectors = QdrantVectorIndex::connect(VectorConfig::default()).await?;
//!     let embedder = OpenAiEmbedder::new(OpenAiConfig::openai("sk-..."))?;
//!
//!     let searcher = HybridSearcher::new(lexical, vectors, embedder);
//!     let results = searcher.search(&SearchRequest::new("apex clutch")).await?;
//!     Ok(())
//! }
//! ```

pub mod backfill;
pub mod embeddings;
pub mod error;
pub mod fallback;
pub mod indexer;
pub mod lexical;
pub mod metrics;
pub mod orchestrator;
pub mod rerank;
pub mod vector;

// Re-exports for convenience
pub use backfill::{BackfillConfig, BackfillReport, BackfillScheduler};
pub use embeddings::{
    cache_key, CachedEmbedder, EmbedPriority, Embedder, EmbedderStatus, EmbeddingCache,
    NoopCache, OpenAiConfig, OpenAiEmbedder, TtlLruCache,
};
pub use error::{Result, SearchError};
pub use fallback::{FallbackConfig, FallbackController, HealthState};
pub use indexer::{IndexerConfig, IndexingPipeline};
pub use lexical::{LexicalConfig, LexicalHit, LexicalIndex, OpenSearchIndex};
pub use metrics::{MetricsSnapshot, SearchMetrics};
pub use orchestrator::HybridSearcher;
pub use rerank::{candidate_pool_size, cosine_similarity, RerankWeights};
pub use vector::{QdrantVectorIndex, VectorConfig, VectorIndex};
