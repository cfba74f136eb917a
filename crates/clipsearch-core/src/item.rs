//! Clip documents and change notifications

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch.
pub fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Opaque clip identifier, stable across the lexical index, the vector store
/// and the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Read projection of a clip record.
///
/// The canonical content store owns this data; the search subsystem only
/// reads it. The embedding fields (`embedded_at`, `embedding_model`) are
/// bookkeeping maintained by the backfill path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipDocument {
    pub id: ItemId,
    pub title: String,
    pub creator_name: String,
    pub broadcaster_name: String,
    pub game_name: Option<String>,
    pub language: Option<String>,
    pub tags: Vec<String>,
    pub view_count: u64,
    pub vote_score: i64,
    pub comment_count: u64,
    pub favorite_count: u64,
    pub is_nsfw: bool,
    /// Soft-delete flag. Removed clips stay in the catalog but are excluded
    /// from search and embedding.
    pub is_removed: bool,
    /// Creation time, seconds since epoch.
    pub created_at: i64,
    /// Last time this document was written to the lexical index.
    pub indexed_at: Option<i64>,
    /// When the current embedding was generated, if any.
    pub embedded_at: Option<i64>,
    /// Model that produced the current embedding.
    pub embedding_model: Option<String>,
}

impl ClipDocument {
    /// Minimal document for tests and seeding.
    pub fn new(id: impl Into<ItemId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            creator_name: String::new(),
            broadcaster_name: String::new(),
            game_name: None,
            language: None,
            tags: Vec::new(),
            view_count: 0,
            vote_score: 0,
            comment_count: 0,
            favorite_count: 0,
            is_nsfw: false,
            is_removed: false,
            created_at: epoch_now(),
            indexed_at: None,
            embedded_at: None,
            embedding_model: None,
        }
    }

    pub fn has_embedding(&self) -> bool {
        self.embedded_at.is_some()
    }

    /// Text representation fed to the embedding API.
    ///
    /// Title first, then broadcaster, clipper (when distinct), game and tags.
    /// Field order is fixed so the same document always hashes to the same
    /// cache key.
    pub fn embedding_text(&self) -> String {
        let mut parts = Vec::new();

        if !self.title.is_empty() {
            parts.push(format!("Title: {}", self.title));
        }
        if !self.broadcaster_name.is_empty() {
            parts.push(format!("Broadcaster: {}", self.broadcaster_name));
        }
        if !self.creator_name.is_empty() && self.creator_name != self.broadcaster_name {
            parts.push(format!("Clipped by: {}", self.creator_name));
        }
        if let Some(game) = self.game_name.as_deref() {
            if !game.is_empty() {
                parts.push(format!("Game: {}", game));
            }
        }
        if !self.tags.is_empty() {
            parts.push(format!("Tags: {}", self.tags.join(", ")));
        }

        parts.join(". ")
    }
}

/// Change notification from the canonical content store.
///
/// The indexing pipeline converts these into [`crate::IndexingJob`]s. The
/// payload is just the identifier: item text is always re-read from the
/// catalog so a stale notification cannot index stale content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Clip created or updated. `text_changed` marks updates that touched the
    /// embedded fields, which invalidates any existing vector.
    Upserted { id: ItemId, text_changed: bool },
    /// Clip deleted (or soft-removed).
    Deleted { id: ItemId },
}

impl ChangeEvent {
    pub fn item_id(&self) -> &ItemId {
        match self {
            ChangeEvent::Upserted { id, .. } | ChangeEvent::Deleted { id } => id,
        }
    }
}
