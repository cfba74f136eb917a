//! Embedding provider trait and status types

use async_trait::async_trait;

use crate::error::Result;

/// Health and capability information for an embedding provider.
#[derive(Debug, Clone)]
pub struct EmbedderStatus {
    /// Whether the provider is reachable and responding
    pub available: bool,
    /// Model the provider serves
    pub model: String,
    /// Last health check latency in milliseconds
    pub latency_ms: Option<u64>,
    /// Error message if the provider is unavailable
    pub error: Option<String>,
}

impl EmbedderStatus {
    pub fn healthy(model: impl Into<String>) -> Self {
        Self {
            available: true,
            model: model.into(),
            latency_ms: None,
            error: None,
        }
    }

    pub fn unavailable(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            available: false,
            model: model.into(),
            latency_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// How urgent an embedding request is. Foreground (query) traffic waits for
/// a rate-limit permit; background (backfill) traffic yields when the limiter
/// has no headroom so queries are never starved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPriority {
    Foreground,
    Background,
}

/// Text embedding generation.
///
/// Implementations must be `Send + Sync` for concurrent use from the search
/// orchestrator and the backfill workers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Returns one vector per input, in input order.
    ///
    /// An empty input returns an empty output without touching the provider.
    async fn embed(&self, texts: Vec<String>, priority: EmbedPriority) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text. Convenience over [`Embedder::embed`].
    async fn embed_one(&self, text: String, priority: EmbedPriority) -> Result<Vec<f32>> {
        let mut vectors = self.embed(vec![text], priority).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::error::SearchError::Embedding("empty response".into()))
    }

    /// Dimension of the vectors this embedder produces.
    fn dimension(&self) -> usize;

    /// Model identifier, used in cache keys and catalog bookkeeping.
    fn model(&self) -> &str;

    /// Check provider health.
    async fn check_status(&self) -> Result<EmbedderStatus>;
}
