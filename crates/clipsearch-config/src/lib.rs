//! clipsearch configuration management
//!
//! Loads a single TOML file (default `~/.clipsearch/config.toml`, overridable
//! on the command line) into [`ClipSearchConfig`]. Every section has full
//! defaults so an empty file is a valid configuration for local development.
//!
//! Secrets never live in the file: the embedding section names an
//! environment variable (`api_key_env`) and the key is resolved at startup.

mod error;

pub use error::ConfigError;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const CONFIG_DIR: &str = ".clipsearch";

/// Root configuration for clipsearch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClipSearchConfig {
    /// Lexical index connection
    pub lexical: LexicalSettings,

    /// Vector store connection
    pub vector: VectorSettings,

    /// Embedding provider
    pub embedding: EmbeddingSettings,

    /// Embedding cache
    pub cache: CacheSettings,

    /// Score blending
    pub rerank: RerankSettings,

    /// Degradation thresholds
    pub fallback: FallbackSettings,

    /// Indexing pipeline
    pub indexer: IndexerSettings,

    /// Embedding backfill
    pub backfill: BackfillSettings,

    /// Catalog projection database
    pub catalog: CatalogSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// OpenSearch-compatible endpoint settings.
///
/// # Example TOML
///
/// ```toml
/// [lexical]
/// url = "http://localhost:9200"
/// index = "clips"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalSettings {
    pub url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LexicalSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".into(),
            index: "clips".into(),
            username: None,
            password: None,
            timeout_secs: 10,
        }
    }
}

/// Qdrant endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    pub url: String,
    /// Environment variable holding the API key, if the server needs one
    pub api_key_env: Option<String>,
    pub collection: String,
    pub dimension: usize,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".into(),
            api_key_env: None,
            collection: "clip_embeddings".into(),
            dimension: 1536,
        }
    }
}

/// Embedding provider settings.
///
/// # Example TOML
///
/// ```toml
/// [embedding]
/// url = "https://api.openai.com/v1"
/// api_key_env = "OPENAI_API_KEY"
/// model = "text-embedding-3-small"
/// dimension = 1536
/// requests_per_minute = 300
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub url: String,
    /// Environment variable holding the API key (never the key itself)
    pub api_key_env: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub requests_per_minute: u32,
    pub max_input_chars: usize,
    /// Per-query embedding deadline in milliseconds
    pub query_timeout_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1".into(),
            api_key_env: Some("OPENAI_API_KEY".into()),
            model: "text-embedding-3-small".into(),
            dimension: 1536,
            timeout_secs: 30,
            max_retries: 3,
            requests_per_minute: 300,
            max_input_chars: 8000,
            query_timeout_ms: 2000,
        }
    }
}

impl EmbeddingSettings {
    /// Resolve the API key from the configured environment variable.
    /// Returns None when no variable is configured (local providers).
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        match &self.api_key_env {
            None => Ok(None),
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.is_empty() => Ok(Some(key)),
                _ => Err(ConfigError::missing_env_var("embedding.api_key_env", var)),
            },
        }
    }
}

/// Embedding cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            ttl_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Blend weights for re-ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub lexical_weight: f32,
    pub vector_weight: f32,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            lexical_weight: 0.3,
            vector_weight: 0.7,
        }
    }
}

/// Degradation controller thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub window_secs: u64,
    pub min_samples: usize,
    pub failure_rate_threshold: f64,
    pub p95_latency_ms: u64,
    pub cooldown_secs: u64,
    pub probe_one_in: u64,
    pub probe_successes: u64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            min_samples: 10,
            failure_rate_threshold: 0.5,
            p95_latency_ms: 2000,
            cooldown_secs: 30,
            probe_one_in: 5,
            probe_successes: 3,
        }
    }
}

/// Indexing pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 500,
            concurrency: 4,
            queue_capacity: 1024,
        }
    }
}

/// Backfill scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillSettings {
    pub interval_secs: u64,
    pub lookback_days: u64,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            lookback_days: 7,
            batch_size: 100,
            concurrency: 4,
        }
    }
}

/// Catalog projection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// SQLite database path. Relative paths resolve against the working
    /// directory.
    pub path: PathBuf,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("clipsearch.db"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (e.g., "info", "clipsearch_search=debug")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl ClipSearchConfig {
    /// Default config file location (`~/.clipsearch/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::parse_toml(path, e))?;
        debug!(path = %path.display(), "loaded configuration");
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, the default location, or fall back to
    /// built-in defaults when no file exists.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(&default),
            _ => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lexical.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "lexical.url is required".into(),
            ));
        }
        if self.lexical.index.is_empty() {
            return Err(ConfigError::ValidationError(
                "lexical.index is required".into(),
            ));
        }
        if self.embedding.model.is_empty() {
            return Err(ConfigError::ValidationError(
                "embedding.model is required".into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be positive".into(),
            ));
        }
        if self.embedding.dimension != self.vector.dimension {
            return Err(ConfigError::ValidationError(format!(
                "embedding.dimension ({}) must match vector.dimension ({})",
                self.embedding.dimension, self.vector.dimension
            )));
        }
        if self.rerank.lexical_weight < 0.0
            || self.rerank.vector_weight < 0.0
            || self.rerank.lexical_weight + self.rerank.vector_weight <= 0.0
        {
            return Err(ConfigError::ValidationError(
                "rerank weights must be non-negative and sum to a positive value".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fallback.failure_rate_threshold) {
            return Err(ConfigError::ValidationError(
                "fallback.failure_rate_threshold must be within [0, 1]".into(),
            ));
        }
        if self.indexer.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "indexer.max_attempts must be at least 1".into(),
            ));
        }
        if self.backfill.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "backfill.batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn empty_file_yields_defaults() {
        let (_dir, path) = write_config("");
        let config = ClipSearchConfig::load(&path).unwrap();

        assert_eq!(config.lexical.index, "clips");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.backfill.batch_size, 100);
        assert!(config.cache.enabled);
    }

    #[test]
    fn sections_override_defaults() {
        let (_dir, path) = write_config(
            r#"
            [lexical]
            url = "http://search.internal:9200"
            index = "clips_v2"

            [embedding]
            model = "nomic-embed-text"
            dimension = 768

            [vector]
            dimension = 768

            [rerank]
            lexical_weight = 0.5
            vector_weight = 0.5
            "#,
        );
        let config = ClipSearchConfig::load(&path).unwrap();

        assert_eq!(config.lexical.url, "http://search.internal:9200");
        assert_eq!(config.lexical.index, "clips_v2");
        assert_eq!(config.embedding.dimension, 768);
        assert!((config.rerank.lexical_weight - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let (_dir, path) = write_config(
            r#"
            [embedding]
            dimension = 768
            "#,
        );
        let result = ClipSearchConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn bad_rerank_weights_are_rejected() {
        let (_dir, path) = write_config(
            r#"
            [rerank]
            lexical_weight = -1.0
            vector_weight = 0.5
            "#,
        );
        assert!(ClipSearchConfig::load(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ClipSearchConfig::load(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn api_key_resolution_requires_the_variable() {
        let settings = EmbeddingSettings {
            api_key_env: Some("CLIPSEARCH_TEST_KEY_UNSET".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.resolve_api_key(),
            Err(ConfigError::MissingEnvVar { .. })
        ));

        let no_key = EmbeddingSettings {
            api_key_env: None,
            ..Default::default()
        };
        assert_eq!(no_key.resolve_api_key().unwrap(), None);
    }
}
