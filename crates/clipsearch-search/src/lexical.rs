//! Lexical (keyword) index over HTTP
//!
//! Talks to an OpenSearch/Elasticsearch-compatible endpoint. Queries are
//! `multi_match` over the clip text fields, wrapped in a `function_score`
//! that folds in index-time engagement and recency signals.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use clipsearch_core::{epoch_now, ClipDocument, ItemId, SearchFilters};

use crate::error::{Result, SearchError};

/// Default connection timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Engagement weights: votes dominate, views barely register.
const VOTE_WEIGHT: f64 = 10.0;
const COMMENT_WEIGHT: f64 = 5.0;
const FAVORITE_WEIGHT: f64 = 3.0;
const VIEW_WEIGHT: f64 = 0.01;

/// Recency half-life in days. A week-old clip scores half of a fresh one.
const RECENCY_HALF_LIFE_DAYS: f64 = 7.0;

/// Weighted interaction score, stored on the document at index time.
pub fn engagement_score(doc: &ClipDocument) -> f64 {
    doc.vote_score as f64 * VOTE_WEIGHT
        + doc.comment_count as f64 * COMMENT_WEIGHT
        + doc.favorite_count as f64 * FAVORITE_WEIGHT
        + doc.view_count as f64 * VIEW_WEIGHT
}

/// Exponential-decay freshness score in [0, 100].
pub fn recency_score(created_at: i64, now: i64) -> f64 {
    let days_since = ((now - created_at).max(0) as f64) / 86_400.0;
    100.0 * (-std::f64::consts::LN_2 * days_since / RECENCY_HALF_LIFE_DAYS).exp()
}

/// A scored match from the lexical index.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub id: ItemId,
    pub score: f32,
}

/// Keyword retrieval and index maintenance.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Retrieve up to `size` candidates for `query`, best first.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        size: usize,
    ) -> Result<Vec<LexicalHit>>;

    /// Write or overwrite a single document.
    async fn upsert(&self, doc: &ClipDocument) -> Result<()>;

    /// Remove a document. Deleting an absent document succeeds.
    async fn delete(&self, id: &ItemId) -> Result<()>;

    /// Write a batch of documents in one request.
    async fn bulk_upsert(&self, docs: &[ClipDocument]) -> Result<()>;

    /// Create the index with its mappings if it does not exist yet.
    async fn ensure_index(&self) -> Result<()>;
}

/// Configuration for connecting to the lexical index
#[derive(Debug, Clone)]
pub struct LexicalConfig {
    /// Endpoint URL (e.g., "http://localhost:9200")
    pub url: String,
    /// Index name holding clip documents
    pub index: String,
    /// Optional basic-auth credentials
    pub username: Option<String>,
    pub password: Option<String>,
    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: "clips".to_string(),
            username: None,
            password: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LexicalConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// OpenSearch-compatible lexical index client.
pub struct OpenSearchIndex {
    client: Client,
    config: LexicalConfig,
}

impl OpenSearchIndex {
    pub fn new(config: LexicalConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SearchError::LexicalUnavailable(format!("HTTP client error: {}", e)))?;

        Ok(Self { client, config })
    }

    fn doc_url(&self, id: &ItemId) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.config.url.trim_end_matches('/'),
            self.config.index,
            id
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.username, &self.config.password) {
            (Some(user), password) => builder.basic_auth(user, password.as_deref()),
            _ => builder,
        }
    }

    fn connection_error(e: reqwest::Error) -> SearchError {
        if e.is_timeout() || e.is_connect() {
            SearchError::LexicalUnavailable(e.to_string())
        } else {
            SearchError::Lexical(e.to_string())
        }
    }

    /// Full search body: text match, filters and relevance boosting.
    fn build_query(&self, query: &str, filters: &SearchFilters, size: usize) -> Value {
        let mut must = Vec::new();
        let mut filter = vec![json!({"term": {"is_removed": false}})];

        if !query.is_empty() {
            must.push(json!({
                "multi_match": {
                    "query": query,
                    "fields": ["title^3", "creator_name^2", "broadcaster_name^2", "game_name"],
                    "fuzziness": "AUTO",
                    "operator": "and"
                }
            }));
        } else {
            must.push(json!({"match_all": {}}));
        }

        if let Some(ref game) = filters.game_name {
            filter.push(json!({"term": {"game_name.keyword": game}}));
        }
        if let Some(ref language) = filters.language {
            filter.push(json!({"term": {"language": language}}));
        }
        if !filters.include_nsfw {
            filter.push(json!({"term": {"is_nsfw": false}}));
        }

        json!({
            "size": size,
            "_source": false,
            "query": {
                "function_score": {
                    "query": {
                        "bool": {
                            "must": must,
                            "filter": filter
                        }
                    },
                    "functions": [
                        {
                            "field_value_factor": {
                                "field": "engagement_score",
                                "modifier": "log1p",
                                "factor": 0.1,
                                "missing": 0
                            }
                        },
                        {
                            "field_value_factor": {
                                "field": "recency_score",
                                "modifier": "none",
                                "factor": 0.5,
                                "missing": 0
                            }
                        }
                    ],
                    "score_mode": "sum",
                    "boost_mode": "sum"
                }
            }
        })
    }

    fn build_document(doc: &ClipDocument) -> Value {
        let now = epoch_now();
        json!({
            "id": doc.id,
            "title": doc.title,
            "creator_name": doc.creator_name,
            "broadcaster_name": doc.broadcaster_name,
            "game_name": doc.game_name,
            "language": doc.language,
            "tags": doc.tags,
            "view_count": doc.view_count,
            "vote_score": doc.vote_score,
            "comment_count": doc.comment_count,
            "favorite_count": doc.favorite_count,
            "is_nsfw": doc.is_nsfw,
            "is_removed": doc.is_removed,
            "created_at": doc.created_at,
            "indexed_at": now,
            "engagement_score": engagement_score(doc),
            "recency_score": recency_score(doc.created_at, now),
        })
    }

    async fn check_response(response: reqwest::Response, context: &str) -> Result<Value> {
        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(SearchError::LexicalUnavailable(format!(
                "{}: service unavailable",
                context
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Lexical(format!(
                "{} failed with status {}: {}",
                context, status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| SearchError::Lexical(format!("{}: invalid response: {}", context, e)))
    }
}

#[async_trait]
impl LexicalIndex for OpenSearchIndex {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        size: usize,
    ) -> Result<Vec<LexicalHit>> {
        let url = format!(
            "{}/{}/_search",
            self.config.url.trim_end_matches('/'),
            self.config.index
        );
        let body = self.build_query(query, filters, size);

        debug!(%query, size, "lexical search");

        let response = self
            .request(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::connection_error)?;

        let parsed = Self::check_response(response, "search").await?;

        let hits = parsed["hits"]["hits"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| {
                        let id = hit["_id"].as_str()?;
                        let score = hit["_score"].as_f64()? as f32;
                        Some(LexicalHit {
                            id: ItemId::from(id),
                            score,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(hits)
    }

    async fn upsert(&self, doc: &ClipDocument) -> Result<()> {
        let url = format!("{}?refresh=false", self.doc_url(&doc.id));
        let body = Self::build_document(doc);

        let response = self
            .request(self.client.put(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::connection_error)?;

        Self::check_response(response, "upsert").await?;
        Ok(())
    }

    async fn delete(&self, id: &ItemId) -> Result<()> {
        let response = self
            .request(self.client.delete(self.doc_url(id)))
            .send()
            .await
            .map_err(Self::connection_error)?;

        // Already gone counts as deleted
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%id, "delete of absent document");
            return Ok(());
        }

        Self::check_response(response, "delete").await?;
        Ok(())
    }

    async fn bulk_upsert(&self, docs: &[ClipDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for doc in docs {
            let meta = json!({"index": {"_index": self.config.index, "_id": doc.id}});
            body.push_str(&serde_json::to_string(&meta)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&Self::build_document(doc))?);
            body.push('\n');
        }

        let url = format!("{}/_bulk", self.config.url.trim_end_matches('/'));
        let response = self
            .request(self.client.post(&url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(Self::connection_error)?;

        let parsed = Self::check_response(response, "bulk").await?;

        if parsed["errors"].as_bool().unwrap_or(false) {
            return Err(SearchError::Lexical("bulk request had item errors".into()));
        }

        debug!(count = docs.len(), "bulk indexed");
        Ok(())
    }

    async fn ensure_index(&self) -> Result<()> {
        let url = format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            self.config.index
        );

        let response = self
            .request(self.client.head(&url))
            .send()
            .await
            .map_err(Self::connection_error)?;

        if response.status().is_success() {
            debug!(index = %self.config.index, "index already exists");
            return Ok(());
        }

        let mapping = json!({
            "settings": {
                "number_of_shards": 1,
                "number_of_replicas": 1
            },
            "mappings": {
                "properties": {
                    "id":               {"type": "keyword"},
                    "title":            {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
                    "creator_name":     {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
                    "broadcaster_name": {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
                    "game_name":        {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
                    "language":         {"type": "keyword"},
                    "tags":             {"type": "keyword"},
                    "view_count":       {"type": "long"},
                    "vote_score":       {"type": "long"},
                    "comment_count":    {"type": "long"},
                    "favorite_count":   {"type": "long"},
                    "is_nsfw":          {"type": "boolean"},
                    "is_removed":       {"type": "boolean"},
                    "created_at":       {"type": "long"},
                    "indexed_at":       {"type": "long"},
                    "engagement_score": {"type": "float"},
                    "recency_score":    {"type": "float"}
                }
            }
        });

        let response = self
            .request(self.client.put(&url))
            .json(&mapping)
            .send()
            .await
            .map_err(Self::connection_error)?;

        Self::check_response(response, "create index").await?;
        info!(index = %self.config.index, "lexical index created");
        Ok(())
    }
}
