//! OpenAI-compatible embedding client
//!
//! Generates clip and query embeddings via OpenAI-compatible APIs
//! (OpenAI, Azure OpenAI, Ollama, other self-hosted gateways).
//!
//! # Endpoint Format
//!
//! - POST `{base_url}/v1/embeddings`
//! - Request: `{"model": "...", "input": ["text1", "text2", ...]}`
//! - Response: `{"data": [{"embedding": [...], "index": 0}, ...], ...}`

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider::{EmbedPriority, Embedder, EmbedderStatus};
use crate::error::{Result, SearchError};

/// Default timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default max retries
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Default requests per minute limit
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 300;

/// Default input truncation (characters)
const DEFAULT_MAX_INPUT_CHARS: usize = 8000;

/// Poll interval while background work waits for rate-limit headroom
const BACKGROUND_POLL_MS: u64 = 250;

/// Type alias for the rate limiter
type EmbedRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Configuration for the OpenAI-compatible embedding client
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL for the API (e.g., "https://api.openai.com/v1" or "http://localhost:11434/v1")
    pub base_url: String,
    /// API key (optional for local providers like Ollama)
    pub api_key: Option<String>,
    /// Embedding model (e.g., "text-embedding-3-small")
    pub model: String,
    /// Expected vector dimension. Responses with a different dimension are rejected.
    pub dimension: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Requests per minute limit
    pub requests_per_minute: u32,
    /// Inputs longer than this are truncated before sending
    pub max_input_chars: usize,
}

impl OpenAiConfig {
    /// Create config for the OpenAI API
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: Some(api_key.into()),
            model: "text-embedding-3-small".into(),
            dimension: 1536,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    /// Create config for an Ollama local endpoint
    pub fn ollama() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            api_key: None,
            model: "nomic-embed-text".into(),
            dimension: 768,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set max retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set requests per minute limit
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }
}

/// Request body for the /v1/embeddings endpoint
#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct EmbeddingsRequest {
    pub(crate) model: String,
    pub(crate) input: Vec<String>,
}

/// Single embedding in the response
#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[allow(dead_code)]
    index: usize,
}

/// Response from the /v1/embeddings endpoint
#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
    #[allow(dead_code)]
    model: Option<String>,
}

/// OpenAI-compatible embedding client with rate limiting and retry.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
    rate_limiter: Arc<EmbedRateLimiter>,
}

impl Clone for OpenAiEmbedder {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            rate_limiter: self.rate_limiter.clone(),
        }
    }
}

impl OpenAiEmbedder {
    /// Create a new embedding client
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.dimension == 0 {
            return Err(SearchError::InvalidConfig(
                "embedding dimension must be positive".into(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SearchError::EmbeddingUnavailable(format!("HTTP client error: {}", e)))?;

        let rpm = NonZeroU32::new(config.requests_per_minute)
            .unwrap_or(NonZeroU32::new(DEFAULT_REQUESTS_PER_MINUTE).unwrap());
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// Wait for a rate-limit permit.
    ///
    /// Foreground callers block on the limiter directly; background callers
    /// poll so that a saturated minute never queues bulk work ahead of
    /// interactive queries.
    async fn wait_for_permit(&self, priority: EmbedPriority) {
        match priority {
            EmbedPriority::Foreground => self.rate_limiter.until_ready().await,
            EmbedPriority::Background => {
                while self.rate_limiter.check().is_err() {
                    tokio::time::sleep(Duration::from_millis(BACKGROUND_POLL_MS)).await;
                }
            }
        }
    }

    /// Get the embeddings endpoint URL
    fn embeddings_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        // Handle both /v1 and non-/v1 URLs
        if base.ends_with("/v1") {
            format!("{}/embeddings", base)
        } else {
            format!("{}/v1/embeddings", base)
        }
    }

    /// Truncate a single input to the configured character budget.
    fn truncate(&self, text: String) -> String {
        if text.chars().count() <= self.config.max_input_chars {
            return text;
        }
        text.chars().take(self.config.max_input_chars).collect()
    }

    /// Send request with retry logic
    async fn request_with_retry(
        &self,
        texts: Vec<String>,
        priority: EmbedPriority,
    ) -> Result<Vec<Vec<f32>>> {
        let mut retry_delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 0..=self.config.max_retries {
            // Each attempt consumes a permit
            self.wait_for_permit(priority).await;

            match self.send_request(texts.clone()).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    // Auth failures and unknown models never heal on retry
                    if matches!(
                        e,
                        SearchError::EmbeddingAuth(_)
                            | SearchError::InvalidModel(_)
                            | SearchError::DimensionMismatch { .. }
                    ) {
                        return Err(e);
                    }

                    if attempt < self.config.max_retries {
                        warn!(
                            attempt = attempt + 1,
                            error = %e,
                            "embedding request failed, retrying"
                        );
                        tokio::time::sleep(retry_delay).await;
                        retry_delay *= 2;
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(SearchError::EmbeddingUnavailable(
            "request failed after retries".into(),
        ))
    }

    /// Send a single request to the endpoint
    async fn send_request(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let url = self.embeddings_url();
        let request_body = EmbeddingsRequest {
            model: self.config.model.clone(),
            input: texts,
        };

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request_body);

        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::EmbeddingTimeout
            } else if e.is_connect() {
                SearchError::EmbeddingUnavailable(format!("Connection failed: {}", e))
            } else {
                SearchError::EmbeddingUnavailable(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();

        match status {
            StatusCode::OK => {
                let embed_response: EmbeddingsResponse = response.json().await.map_err(|e| {
                    SearchError::EmbeddingUnavailable(format!("Invalid response: {}", e))
                })?;

                // Responses come back in input order
                let mut data = embed_response.data;
                data.sort_by_key(|d| d.index);
                let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

                if embeddings.len() != expected {
                    return Err(SearchError::Embedding(format!(
                        "expected {} embeddings, got {}",
                        expected,
                        embeddings.len()
                    )));
                }

                for vector in &embeddings {
                    if vector.len() != self.config.dimension {
                        return Err(SearchError::DimensionMismatch {
                            expected: self.config.dimension,
                            actual: vector.len(),
                        });
                    }
                }

                Ok(embeddings)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(SearchError::EmbeddingAuth(body))
            }
            StatusCode::NOT_FOUND => {
                let body = response.text().await.unwrap_or_default();
                Err(SearchError::InvalidModel(body))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());

                Err(SearchError::EmbeddingRateLimit { retry_after })
            }
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => Err(
                SearchError::EmbeddingUnavailable("service temporarily unavailable".into()),
            ),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(SearchError::EmbeddingUnavailable(format!(
                    "request failed with status {}: {}",
                    status, body
                )))
            }
        }
    }

    /// Perform a health check
    async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();
        self.send_request(vec!["health check".into()]).await?;
        Ok(start.elapsed())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: Vec<String>, priority: EmbedPriority) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let texts: Vec<String> = texts.into_iter().map(|t| self.truncate(t)).collect();
        debug!(count = texts.len(), model = %self.config.model, "embedding batch");
        self.request_with_retry(texts, priority).await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn check_status(&self) -> Result<EmbedderStatus> {
        match self.health_check().await {
            Ok(latency) => Ok(EmbedderStatus::healthy(&self.config.model)
                .with_latency(latency.as_millis() as u64)),
            Err(e) => Ok(EmbedderStatus::unavailable(
                &self.config.model,
                e.to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("dimension", &self.config.dimension)
            .field("timeout_secs", &self.config.timeout_secs)
            .finish()
    }
}
