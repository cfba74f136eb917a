//! Vector re-ranking of lexical candidates
//!
//! Scores are blended, not replaced: each candidate keeps its lexical score
//! (max-normalized over the pool) and gains a vector term when a stored
//! embedding exists. Candidates without an embedding keep their normalized
//! lexical score untouched so a stale vector store never buries fresh clips.

use std::collections::HashMap;

use tracing::debug;

use clipsearch_core::{Candidate, ItemId};

use crate::error::{Result, SearchError};

/// Candidate pool bounds: retrieve several times the requested page so
/// re-ranking has room to move results, within sane limits.
const POOL_FACTOR: usize = 5;
const POOL_MIN: usize = 100;
const POOL_MAX: usize = 500;

/// How many lexical candidates to retrieve for a page of `needed` results.
pub fn candidate_pool_size(needed: usize) -> usize {
    (needed * POOL_FACTOR).clamp(POOL_MIN, POOL_MAX)
}

/// Relative weight of the lexical and vector terms in the blended score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    pub lexical: f32,
    pub vector: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            lexical: 0.3,
            vector: 0.7,
        }
    }
}

impl RerankWeights {
    pub fn new(lexical: f32, vector: f32) -> Result<Self> {
        if lexical < 0.0 || vector < 0.0 || lexical + vector <= 0.0 {
            return Err(SearchError::InvalidConfig(format!(
                "rerank weights must be non-negative and sum to a positive value, got lexical={} vector={}",
                lexical, vector
            )));
        }
        Ok(Self { lexical, vector })
    }
}

/// Cosine similarity in [-1, 1]. None for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Map cosine distance in [0, 2] to similarity in [0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Blend vector similarity into the candidate pool and reorder it.
///
/// Mutates each candidate's `distance` and `blended` fields, then sorts the
/// pool best first. Ties break on id so ordering is deterministic.
pub fn rerank(
    query_vector: &[f32],
    candidates: &mut [Candidate],
    stored: &HashMap<ItemId, Vec<f32>>,
    weights: RerankWeights,
) {
    if candidates.is_empty() {
        return;
    }

    let max_lexical = candidates
        .iter()
        .map(|c| c.lexical_score)
        .fold(0.0f32, f32::max);

    let mut with_vectors = 0usize;
    for candidate in candidates.iter_mut() {
        let normalized = if max_lexical > 0.0 {
            candidate.lexical_score / max_lexical
        } else {
            0.0
        };

        let similarity = stored
            .get(&candidate.id)
            .and_then(|vector| cosine_similarity(query_vector, vector));

        match similarity {
            Some(cos) => {
                let distance = 1.0 - cos;
                candidate.distance = Some(distance);
                candidate.blended = weights.lexical * normalized
                    + weights.vector * distance_to_similarity(distance);
                with_vectors += 1;
            }
            None => {
                candidate.distance = None;
                candidate.blended = normalized;
            }
        }
    }

    debug!(
        pool = candidates.len(),
        with_vectors, "blended candidate scores"
    );

    candidates.sort_by(|a, b| {
        b.blended
            .partial_cmp(&a.blended)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
