//! Search requests, candidates and ranked results

use serde::{Deserialize, Serialize};

use crate::item::ItemId;

/// Default number of results returned by a search.
pub const DEFAULT_LIMIT: usize = 20;

/// Structured filters applied to lexical retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub game_name: Option<String>,
    pub language: Option<String>,
    pub include_nsfw: bool,
}

/// A free-text query over the clip corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    #[serde(default)]
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            filters: SearchFilters::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A candidate produced by lexical retrieval, enriched during re-ranking.
/// Transient: constructed per query, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: ItemId,
    /// Relevance score from the lexical index (unitless, retriever-defined).
    pub lexical_score: f32,
    /// Cosine distance to the query vector, when a stored vector exists.
    pub distance: Option<f32>,
    /// Final blended score used for ordering.
    pub blended: f32,
}

impl Candidate {
    pub fn lexical(id: ItemId, score: f32) -> Self {
        Self {
            id,
            lexical_score: score,
            distance: None,
            blended: score,
        }
    }
}

/// One entry in the ranked response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedClip {
    pub id: ItemId,
    /// 1-based position in the final ordering.
    pub rank: usize,
    pub score: f32,
    /// True when this result was ranked without the vector term.
    pub degraded: bool,
}

/// Response metadata so callers and metrics can distinguish result quality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResultsMeta {
    /// The embedding/re-rank path was skipped or failed; results are
    /// lexical-only.
    pub used_fallback: bool,
    /// Size of the lexical candidate pool before truncation.
    pub total_candidates: usize,
    pub elapsed_ms: u64,
}

/// The only search output exposed to the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<RankedClip>,
    pub meta: SearchResultsMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req = SearchRequest::new("apex clutch");
        assert_eq!(req.limit, DEFAULT_LIMIT);
        assert!(!req.filters.include_nsfw);
    }

    #[test]
    fn lexical_candidate_blends_to_its_own_score() {
        let c = Candidate::lexical("a".into(), 0.9);
        assert_eq!(c.blended, 0.9);
        assert!(c.distance.is_none());
    }
}
