//! Command implementations and shared wiring

pub mod backfill;
pub mod init;
pub mod search;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use clipsearch_config::ClipSearchConfig;
use clipsearch_core::SqliteCatalog;
use clipsearch_search::{
    fallback::FallbackConfig, rerank::RerankWeights, CachedEmbedder, EmbeddingCache,
    FallbackController, HybridSearcher, LexicalConfig, NoopCache, OpenAiConfig, OpenAiEmbedder,
    OpenSearchIndex, QdrantVectorIndex, SearchMetrics, TtlLruCache, VectorConfig,
};

use crate::GlobalOptions;

/// The embedder stack every command shares: provider behind the cache.
pub type CliEmbedder = CachedEmbedder<OpenAiEmbedder, Arc<dyn EmbeddingCache>>;

/// Load configuration from the CLI-specified or default location.
pub fn load_config(global: &GlobalOptions) -> Result<ClipSearchConfig> {
    ClipSearchConfig::load_or_default(global.config.as_deref())
        .context("failed to load configuration")
}

pub fn open_catalog(config: &ClipSearchConfig) -> Result<SqliteCatalog> {
    SqliteCatalog::open(&config.catalog.path).with_context(|| {
        format!(
            "failed to open catalog database at {}",
            config.catalog.path.display()
        )
    })
}

pub fn build_lexical(config: &ClipSearchConfig) -> Result<OpenSearchIndex> {
    OpenSearchIndex::new(LexicalConfig {
        url: config.lexical.url.clone(),
        index: config.lexical.index.clone(),
        username: config.lexical.username.clone(),
        password: config.lexical.password.clone(),
        timeout_secs: config.lexical.timeout_secs,
    })
    .context("failed to build lexical index client")
}

pub async fn connect_vectors(config: &ClipSearchConfig) -> Result<QdrantVectorIndex> {
    let api_key = match &config.vector.api_key_env {
        Some(var) => std::env::var(var).ok(),
        None => None,
    };

    QdrantVectorIndex::connect(VectorConfig {
        url: config.vector.url.clone(),
        api_key,
        collection: config.vector.collection.clone(),
        dimension: config.vector.dimension,
    })
    .await
    .context("failed to connect to the vector store")
}

pub fn build_embedder(config: &ClipSearchConfig) -> Result<CliEmbedder> {
    let api_key = config
        .embedding
        .resolve_api_key()
        .context("failed to resolve embedding API key")?;

    let provider = OpenAiEmbedder::new(OpenAiConfig {
        base_url: config.embedding.url.clone(),
        api_key,
        model: config.embedding.model.clone(),
        dimension: config.embedding.dimension,
        timeout_secs: config.embedding.timeout_secs,
        max_retries: config.embedding.max_retries,
        requests_per_minute: config.embedding.requests_per_minute,
        max_input_chars: config.embedding.max_input_chars,
    })
    .context("failed to build embedding client")?;

    let cache: Arc<dyn EmbeddingCache> = if config.cache.enabled {
        Arc::new(TtlLruCache::new(
            config.cache.capacity,
            Duration::from_secs(config.cache.ttl_secs),
        ))
    } else {
        Arc::new(NoopCache)
    };

    Ok(CachedEmbedder::new(provider, cache))
}

/// Assemble the full hybrid searcher from configuration.
pub async fn build_searcher(
    config: &ClipSearchConfig,
) -> Result<HybridSearcher<OpenSearchIndex, QdrantVectorIndex, CliEmbedder>> {
    let metrics = Arc::new(SearchMetrics::new());

    let lexical = build_lexical(config)?;
    let vectors = connect_vectors(config).await?;
    let embedder = build_embedder(config)?.with_metrics(Arc::clone(&metrics));

    let fallback = Arc::new(
        FallbackController::new(FallbackConfig {
            window: Duration::from_secs(config.fallback.window_secs),
            min_samples: config.fallback.min_samples,
            failure_rate_threshold: config.fallback.failure_rate_threshold,
            p95_latency_threshold: Duration::from_millis(config.fallback.p95_latency_ms),
            cooldown: Duration::from_secs(config.fallback.cooldown_secs),
            probe_one_in: config.fallback.probe_one_in,
            probe_successes: config.fallback.probe_successes,
        })
        .with_metrics(Arc::clone(&metrics)),
    );

    let weights = RerankWeights::new(
        config.rerank.lexical_weight,
        config.rerank.vector_weight,
    )?;

    Ok(HybridSearcher::new(lexical, vectors, embedder)
        .with_fallback(fallback)
        .with_metrics(metrics)
        .with_weights(weights)
        .with_embed_timeout(Duration::from_millis(config.embedding.query_timeout_ms)))
}
