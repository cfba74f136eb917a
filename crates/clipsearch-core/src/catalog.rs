//! Canonical catalog seam
//!
//! The catalog is the search subsystem's view of the canonical content store.
//! It is read-mostly: the only writes this subsystem performs are embedding
//! bookkeeping (`mark_embedded` / `clear_embedding`) on its own projection
//! columns. Item content and existence are never mutated here.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::item::{ClipDocument, ItemId};

/// Errors from catalog access.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog storage error: {0}")]
    Storage(String),

    #[error("item not found: {0}")]
    NotFound(ItemId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::Storage(err.to_string())
    }
}

/// Embedding coverage over the live (non-removed) corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingCoverage {
    pub embedded: u64,
    pub missing: u64,
}

impl EmbeddingCoverage {
    /// Fraction of live items carrying an embedding, in [0, 1].
    pub fn ratio(&self) -> f64 {
        let total = self.embedded + self.missing;
        if total == 0 {
            1.0
        } else {
            self.embedded as f64 / total as f64
        }
    }
}

/// Read projection of the canonical content store.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch a single item by id. `Ok(None)` when unknown or soft-removed.
    async fn fetch(&self, id: &ItemId) -> Result<Option<ClipDocument>, CatalogError>;

    /// Live items without an embedding, newest first. When
    /// `created_after` is set, only items created at or after that epoch
    /// second are returned (keeps automatic backfill off ancient content).
    async fn missing_embeddings(
        &self,
        created_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ItemId>, CatalogError>;

    /// Record that `id` now has an embedding from `model`.
    async fn mark_embedded(
        &self,
        id: &ItemId,
        model: &str,
        at_epoch: i64,
    ) -> Result<(), CatalogError>;

    /// Invalidate embedding bookkeeping after the source text changed.
    async fn clear_embedding(&self, id: &ItemId) -> Result<(), CatalogError>;

    /// Embedding coverage counts for the live corpus.
    async fn coverage(&self) -> Result<EmbeddingCoverage, CatalogError>;
}

/// In-memory catalog for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    items: RwLock<HashMap<ItemId, ClipDocument>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: ClipDocument) {
        let mut items = self.items.write().expect("catalog lock poisoned");
        items.insert(doc.id.clone(), doc);
    }

    pub fn remove(&self, id: &ItemId) {
        let mut items = self.items.write().expect("catalog lock poisoned");
        items.remove(id);
    }

    pub fn len(&self) -> usize {
        self.items.read().expect("catalog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn fetch(&self, id: &ItemId) -> Result<Option<ClipDocument>, CatalogError> {
        let items = self.items.read().expect("catalog lock poisoned");
        Ok(items.get(id).filter(|d| !d.is_removed).cloned())
    }

    async fn missing_embeddings(
        &self,
        created_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ItemId>, CatalogError> {
        let items = self.items.read().expect("catalog lock poisoned");
        let mut missing: Vec<&ClipDocument> = items
            .values()
            .filter(|d| !d.is_removed && !d.has_embedding())
            .filter(|d| created_after.is_none_or(|cutoff| d.created_at >= cutoff))
            .collect();
        missing.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(missing.into_iter().take(limit).map(|d| d.id.clone()).collect())
    }

    async fn mark_embedded(
        &self,
        id: &ItemId,
        model: &str,
        at_epoch: i64,
    ) -> Result<(), CatalogError> {
        let mut items = self.items.write().expect("catalog lock poisoned");
        let doc = items.get_mut(id).ok_or_else(|| CatalogError::NotFound(id.clone()))?;
        doc.embedded_at = Some(at_epoch);
        doc.embedding_model = Some(model.to_string());
        Ok(())
    }

    async fn clear_embedding(&self, id: &ItemId) -> Result<(), CatalogError> {
        let mut items = self.items.write().expect("catalog lock poisoned");
        if let Some(doc) = items.get_mut(id) {
            doc.embedded_at = None;
            doc.embedding_model = None;
        }
        Ok(())
    }

    async fn coverage(&self) -> Result<EmbeddingCoverage, CatalogError> {
        let items = self.items.read().expect("catalog lock poisoned");
        let mut cov = EmbeddingCoverage::default();
        for doc in items.values().filter(|d| !d.is_removed) {
            if doc.has_embedding() {
                cov.embedded += 1;
            } else {
                cov.missing += 1;
            }
        }
        Ok(cov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, created_at: i64) -> ClipDocument {
        let mut d = ClipDocument::new(id, format!("title {id}"));
        d.created_at = created_at;
        d
    }

    #[tokio::test]
    async fn missing_embeddings_respects_cutoff_and_limit() {
        let catalog = MemoryCatalog::new();
        catalog.insert(doc("old", 100));
        catalog.insert(doc("new-1", 1_000));
        catalog.insert(doc("new-2", 2_000));

        let ids = catalog.missing_embeddings(Some(500), 10).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].as_str(), "new-2"); // newest first

        let ids = catalog.missing_embeddings(None, 1).await.unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn mark_embedded_updates_coverage() {
        let catalog = MemoryCatalog::new();
        catalog.insert(doc("a", 1));
        catalog.insert(doc("b", 2));

        catalog
            .mark_embedded(&"a".into(), "text-embedding-3-small", 123)
            .await
            .unwrap();

        let cov = catalog.coverage().await.unwrap();
        assert_eq!(cov.embedded, 1);
        assert_eq!(cov.missing, 1);
        assert!((cov.ratio() - 0.5).abs() < f64::EPSILON);

        let fetched = catalog.fetch(&"a".into()).await.unwrap().unwrap();
        assert_eq!(fetched.embedded_at, Some(123));
        assert_eq!(
            fetched.embedding_model.as_deref(),
            Some("text-embedding-3-small")
        );
    }

    #[tokio::test]
    async fn clear_embedding_makes_item_missing_again() {
        let catalog = MemoryCatalog::new();
        catalog.insert(doc("a", 1));
        catalog.mark_embedded(&"a".into(), "m", 1).await.unwrap();
        catalog.clear_embedding(&"a".into()).await.unwrap();

        let ids = catalog.missing_embeddings(None, 10).await.unwrap();
        assert_eq!(ids, vec![ItemId::from("a")]);
    }

    #[tokio::test]
    async fn soft_removed_items_are_invisible() {
        let catalog = MemoryCatalog::new();
        let mut d = doc("gone", 1);
        d.is_removed = true;
        catalog.insert(d);

        assert!(catalog.fetch(&"gone".into()).await.unwrap().is_none());
        assert!(catalog.missing_embeddings(None, 10).await.unwrap().is_empty());
        assert_eq!(catalog.coverage().await.unwrap(), EmbeddingCoverage::default());
    }
}
