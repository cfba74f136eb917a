//! Error types for clipsearch-search

use thiserror::Error;

/// Errors that can occur in clipsearch-search operations
#[derive(Error, Debug)]
pub enum SearchError {
    /// Lexical index error
    #[error("Lexical index error: {0}")]
    Lexical(String),

    /// Lexical index unreachable. Search cannot proceed without it.
    #[error("Lexical index unavailable: {0}")]
    LexicalUnavailable(String),

    /// Vector store error
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Embedding error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Embedding provider unavailable
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Embedding dimension mismatch
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding provider authentication failed
    #[error("Embedding provider authentication failed: {0}")]
    EmbeddingAuth(String),

    /// Embedding provider rate limited
    #[error("Embedding provider rate limited, retry after {retry_after:?} seconds")]
    EmbeddingRateLimit { retry_after: Option<u64> },

    /// Embedding model not found
    #[error("Embedding model not found: {0}")]
    InvalidModel(String),

    /// Embedding request deadline elapsed
    #[error("Embedding request timed out")]
    EmbeddingTimeout,

    /// Catalog error
    #[error("Catalog error: {0}")]
    Catalog(#[from] clipsearch_core::CatalogError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<qdrant_client::QdrantError> for SearchError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        SearchError::VectorStore(err.to_string())
    }
}

impl SearchError {
    /// True for failures the orchestrator absorbs by degrading to
    /// lexical-only results instead of failing the request.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            SearchError::Embedding(_)
                | SearchError::EmbeddingUnavailable(_)
                | SearchError::EmbeddingAuth(_)
                | SearchError::EmbeddingRateLimit { .. }
                | SearchError::EmbeddingTimeout
                | SearchError::InvalidModel(_)
                | SearchError::VectorStore(_)
                | SearchError::DimensionMismatch { .. }
        )
    }
}

/// Result type for clipsearch-search operations
pub type Result<T> = std::result::Result<T, SearchError>;
