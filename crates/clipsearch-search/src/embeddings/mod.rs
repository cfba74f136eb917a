//! Embedding generation for hybrid clip search
//!
//! Trait-based so the orchestrator, indexer and backfill path never care
//! which backend produces the vectors:
//!
//! ```text
//! Embedder (trait)
//!     ├── OpenAiEmbedder        - HTTP client for /v1/embeddings APIs
//!     └── CachedEmbedder<E, C>  - cache layer over any Embedder
//! ```
//!
//! Rate limiting and retry live inside `OpenAiEmbedder`; the cache layer
//! only sees hits and misses.

pub mod cache;
pub mod openai;
mod provider;

pub use cache::{cache_key, CachedEmbedder, EmbeddingCache, NoopCache, TtlLruCache};
pub use openai::{OpenAiConfig, OpenAiEmbedder};
pub use provider::{EmbedPriority, Embedder, EmbedderStatus};
