//! Clipsearch core - domain types and the canonical catalog seam
//!
//! This crate holds the read projection of the clip catalog that the search
//! subsystem operates on, plus the transient types that flow through it:
//! search requests and ranked results, change notifications, and indexing jobs.
//!
//! The catalog is the canonical content store's *read projection*: the search
//! subsystem never owns clip content, it only reads item text and existence
//! and records embedding bookkeeping (which model embedded an item, and when).

pub mod catalog;
pub mod item;
pub mod job;
pub mod request;
pub mod sqlite;

pub use catalog::{Catalog, CatalogError, EmbeddingCoverage, MemoryCatalog};
pub use item::{epoch_now, ChangeEvent, ClipDocument, ItemId};
pub use job::{DeadLetterJob, IndexOp, IndexingJob, JobState};
pub use request::{Candidate, RankedClip, SearchFilters, SearchRequest, SearchResults, SearchResultsMeta};
pub use sqlite::SqliteCatalog;
