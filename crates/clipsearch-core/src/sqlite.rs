//! SQLite-backed catalog projection
//!
//! Stores the clip read projection in a local SQLite database. rusqlite is
//! synchronous, so every call runs under `spawn_blocking` with the connection
//! behind a mutex.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::catalog::{Catalog, CatalogError, EmbeddingCoverage};
use crate::item::{ClipDocument, ItemId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS clips (
    id               TEXT PRIMARY KEY,
    title            TEXT NOT NULL,
    creator_name     TEXT NOT NULL DEFAULT '',
    broadcaster_name TEXT NOT NULL DEFAULT '',
    game_name        TEXT,
    language         TEXT,
    tags             TEXT NOT NULL DEFAULT '[]',
    view_count       INTEGER NOT NULL DEFAULT 0,
    vote_score       INTEGER NOT NULL DEFAULT 0,
    comment_count    INTEGER NOT NULL DEFAULT 0,
    favorite_count   INTEGER NOT NULL DEFAULT 0,
    is_nsfw          INTEGER NOT NULL DEFAULT 0,
    is_removed       INTEGER NOT NULL DEFAULT 0,
    created_at       INTEGER NOT NULL,
    indexed_at       INTEGER,
    embedded_at      INTEGER,
    embedding_model  TEXT
);
CREATE INDEX IF NOT EXISTS idx_clips_missing_embedding
    ON clips (created_at DESC)
    WHERE embedded_at IS NULL AND is_removed = 0;
";

/// Catalog projection stored in SQLite.
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Open (or create) the catalog database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!("sqlite catalog ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory catalog, mainly for tests.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a projection row. Used by seeding tools and tests;
    /// in production the canonical store's sync job owns these writes.
    pub async fn upsert(&self, doc: ClipDocument) -> Result<(), CatalogError> {
        self.with_conn(move |conn| {
            let tags = serde_json::to_string(&doc.tags)
                .map_err(|e| CatalogError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO clips (
                    id, title, creator_name, broadcaster_name, game_name, language,
                    tags, view_count, vote_score, comment_count, favorite_count,
                    is_nsfw, is_removed, created_at, indexed_at, embedded_at,
                    embedding_model
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    doc.id.as_str(),
                    doc.title,
                    doc.creator_name,
                    doc.broadcaster_name,
                    doc.game_name,
                    doc.language,
                    tags,
                    doc.view_count as i64,
                    doc.vote_score,
                    doc.comment_count as i64,
                    doc.favorite_count as i64,
                    doc.is_nsfw,
                    doc.is_removed,
                    doc.created_at,
                    doc.indexed_at,
                    doc.embedded_at,
                    doc.embedding_model,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CatalogError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CatalogError::Storage("connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| CatalogError::Storage(format!("catalog task failed: {e}")))?
    }

    fn row_to_doc(row: &Row<'_>) -> rusqlite::Result<ClipDocument> {
        let tags_json: String = row.get("tags")?;
        let tags = serde_json::from_str(&tags_json).unwrap_or_default();
        Ok(ClipDocument {
            id: ItemId::new(row.get::<_, String>("id")?),
            title: row.get("title")?,
            creator_name: row.get("creator_name")?,
            broadcaster_name: row.get("broadcaster_name")?,
            game_name: row.get("game_name")?,
            language: row.get("language")?,
            tags,
            view_count: row.get::<_, i64>("view_count")? as u64,
            vote_score: row.get("vote_score")?,
            comment_count: row.get::<_, i64>("comment_count")? as u64,
            favorite_count: row.get::<_, i64>("favorite_count")? as u64,
            is_nsfw: row.get("is_nsfw")?,
            is_removed: row.get("is_removed")?,
            created_at: row.get("created_at")?,
            indexed_at: row.get("indexed_at")?,
            embedded_at: row.get("embedded_at")?,
            embedding_model: row.get("embedding_model")?,
        })
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn fetch(&self, id: &ItemId) -> Result<Option<ClipDocument>, CatalogError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let doc = conn
                .query_row(
                    "SELECT * FROM clips WHERE id = ?1 AND is_removed = 0",
                    params![id.as_str()],
                    Self::row_to_doc,
                )
                .optional()?;
            Ok(doc)
        })
        .await
    }

    async fn missing_embeddings(
        &self,
        created_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ItemId>, CatalogError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM clips
                 WHERE is_removed = 0 AND embedded_at IS NULL
                   AND created_at >= ?1
                 ORDER BY created_at DESC, id ASC
                 LIMIT ?2",
            )?;
            let cutoff = created_after.unwrap_or(i64::MIN);
            let ids = stmt
                .query_map(params![cutoff, limit as i64], |row| {
                    row.get::<_, String>(0).map(ItemId::new)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn mark_embedded(
        &self,
        id: &ItemId,
        model: &str,
        at_epoch: i64,
    ) -> Result<(), CatalogError> {
        let id = id.clone();
        let model = model.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE clips SET embedded_at = ?1, embedding_model = ?2 WHERE id = ?3",
                params![at_epoch, model, id.as_str()],
            )?;
            if changed == 0 {
                return Err(CatalogError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn clear_embedding(&self, id: &ItemId) -> Result<(), CatalogError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE clips SET embedded_at = NULL, embedding_model = NULL WHERE id = ?1",
                params![id.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn coverage(&self) -> Result<EmbeddingCoverage, CatalogError> {
        self.with_conn(|conn| {
            let embedded: i64 = conn.query_row(
                "SELECT COUNT(*) FROM clips WHERE is_removed = 0 AND embedded_at IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
            let missing: i64 = conn.query_row(
                "SELECT COUNT(*) FROM clips WHERE is_removed = 0 AND embedded_at IS NULL",
                [],
                |row| row.get(0),
            )?;
            Ok(EmbeddingCoverage {
                embedded: embedded as u64,
                missing: missing as u64,
            })
        })
        .await
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
    async fn roundtrip_and_missing_scan() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert(doc("a", 100)).await.unwrap();
        catalog.upsert(doc("b", 200)).await.unwrap();

        let fetched = catalog.fetch(&"a".into()).await.unwrap().unwrap();
        assert_eq!(fetched.title, "title a");

        let missing = catalog.missing_embeddings(None, 10).await.unwrap();
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].as_str(), "b"); // newest first

        catalog.mark_embedded(&"b".into(), "model-x", 5).await.unwrap();
        let missing = catalog.missing_embeddings(None, 10).await.unwrap();
        assert_eq!(missing, vec![ItemId::from("a")]);

        let cov = catalog.coverage().await.unwrap();
        assert_eq!((cov.embedded, cov.missing), (1, 1));
    }

    #[tokio::test]
    async fn mark_embedded_unknown_id_errors() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let err = catalog.mark_embedded(&"nope".into(), "m", 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn tags_survive_roundtrip() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mut d = doc("t", 1);
        d.tags = vec!["clutch".into(), "ranked".into()];
        catalog.upsert(d).await.unwrap();

        let fetched = catalog.fetch(&"t".into()).await.unwrap().unwrap();
        assert_eq!(fetched.tags, vec!["clutch", "ranked"]);
    }

    #[tokio::test]
    async fn persists_to_disk(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let catalog = SqliteCatalog::open(&path).unwrap();
            catalog.upsert(doc("persist", 1)).await.unwrap();
        }
        let reopened = SqliteCatalog::open(&path).unwrap();
        assert!(reopened.fetch(&"persist".into()).await.unwrap().is_some());
    }
}
