//! Embedding backfill scheduler
//!
//! Sweeps the catalog for recent clips that have no embedding yet and fills
//! them in with background-priority provider calls. Runs on a timer but can
//! be triggered manually (admin endpoint, CLI).
//!
//! Passes are idempotent: each clip is re-fetched immediately before its
//! provider call, and an in-flight set keeps an overlapping manual trigger
//! from embedding the same clip twice. A clip that fails stays unembedded
//! and is picked up again on the next pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use clipsearch_core::{epoch_now, Catalog, ItemId};

use crate::embeddings::{EmbedPriority, Embedder};
use crate::error::Result;
use crate::metrics::SearchMetrics;
use crate::vector::VectorIndex;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Time between automatic passes
    pub interval: Duration,
    /// Only clips created within this window are backfilled
    pub lookback: Duration,
    /// Clips per pass
    pub batch_size: usize,
    /// Concurrent provider calls per pass
    pub concurrency: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            lookback: Duration::from_secs(7 * 24 * 60 * 60),
            batch_size: 100,
            concurrency: 4,
        }
    }
}

/// Outcome of one backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Clips the catalog listed as missing an embedding
    pub scanned: usize,
    /// Embeddings generated and stored
    pub embedded: usize,
    /// Clips skipped: already in flight, or gone by generation time
    pub skipped: usize,
    /// Clips whose generation or storage failed
    pub failed: usize,
}

/// Periodic embedding backfill over the catalog.
pub struct BackfillScheduler {
    catalog: Arc<dyn Catalog>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    config: BackfillConfig,
    metrics: Arc<SearchMetrics>,
    in_flight: Mutex<HashSet<ItemId>>,
}

impl BackfillScheduler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        config: BackfillConfig,
        metrics: Arc<SearchMetrics>,
    ) -> Self {
        Self {
            catalog,
            embedder,
            vectors,
            config,
            metrics,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run passes forever on the configured interval.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) => {
                        if report.scanned > 0 {
                            info!(
                                scanned = report.scanned,
                                embedded = report.embedded,
                                skipped = report.skipped,
                                failed = report.failed,
                                "backfill pass complete"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "backfill pass failed"),
                }
            }
        })
    }

    /// One scheduled pass over the recent-clip window: list, claim, embed,
    /// store, mark.
    pub async fn run_once(&self) -> Result<BackfillReport> {
        let cutoff = epoch_now() - self.config.lookback.as_secs() as i64;
        let report = self
            .run_batch(Some(cutoff), self.config.batch_size)
            .await?;
        self.refresh_coverage().await;
        Ok(report)
    }

    /// Manual recovery entry: sweeps the whole catalog regardless of clip
    /// age, batch by batch, until `limit` clips are embedded or no further
    /// progress is possible.
    pub async fn run_forced(
        &self,
        batch_size: usize,
        limit: Option<usize>,
    ) -> Result<BackfillReport> {
        let batch_size = batch_size.max(1);
        let mut total = BackfillReport::default();

        loop {
            let request = match limit {
                Some(limit) => {
                    let left = limit.saturating_sub(total.embedded);
                    if left == 0 {
                        break;
                    }
                    left.min(batch_size)
                }
                None => batch_size,
            };

            let pass = self.run_batch(None, request).await?;
            total.scanned += pass.scanned;
            total.embedded += pass.embedded;
            total.skipped += pass.skipped;
            total.failed += pass.failed;

            // Stop when the catalog is drained, or when an all-failure batch
            // would otherwise loop forever
            if pass.scanned < request || pass.embedded == 0 {
                break;
            }
        }

        self.refresh_coverage().await;
        Ok(total)
    }

    async fn run_batch(
        &self,
        cutoff: Option<i64>,
        batch_size: usize,
    ) -> Result<BackfillReport> {
        let missing = self.catalog.missing_embeddings(cutoff, batch_size).await?;

        let mut report = BackfillReport {
            scanned: missing.len(),
            ..Default::default()
        };

        if missing.is_empty() {
            return Ok(report);
        }

        debug!(count = missing.len(), "backfilling embeddings");

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(missing.len());

        for id in missing {
            // Claim the clip; an overlapping pass owning it skips it here
            if !self.in_flight.lock().insert(id.clone()) {
                report.skipped += 1;
                continue;
            }

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };

            let catalog = Arc::clone(&self.catalog);
            let embedder = Arc::clone(&self.embedder);
            let vectors = Arc::clone(&self.vectors);
            let metrics = Arc::clone(&self.metrics);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                backfill_one(id, catalog, embedder, vectors, metrics).await
            }));
        }

        for handle in handles {
            let (id, outcome) = match handle.await {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "backfill task panicked");
                    report.failed += 1;
                    continue;
                }
            };
            self.in_flight.lock().remove(&id);
            match outcome {
                ItemOutcome::Embedded => report.embedded += 1,
                ItemOutcome::Skipped => report.skipped += 1,
                ItemOutcome::Failed => report.failed += 1,
            }
        }

        Ok(report)
    }

    async fn refresh_coverage(&self) {
        match self.catalog.coverage().await {
            Ok(coverage) => self
                .metrics
                .set_coverage(coverage.embedded, coverage.missing),
            Err(e) => warn!(error = %e, "coverage refresh failed"),
        }
    }
}

enum ItemOutcome {
    Embedded,
    Skipped,
    Failed,
}

/// Embed and store one clip. Never panics back into the pass.
async fn backfill_one(
    id: ItemId,
    catalog: Arc<dyn Catalog>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    metrics: Arc<SearchMetrics>,
) -> (ItemId, ItemOutcome) {
    // Re-check right before the provider call: the clip may have been
    // removed or embedded since the pass listed it
    let doc = match catalog.fetch(&id).await {
        Ok(Some(doc)) if !doc.has_embedding() => doc,
        Ok(_) => return (id, ItemOutcome::Skipped),
        Err(e) => {
            warn!(%id, error = %e, "backfill fetch failed");
            return (id, ItemOutcome::Failed);
        }
    };

    let text = doc.embedding_text();
    let vector = match embedder
        .embed_one(text, EmbedPriority::Background)
        .await
    {
        Ok(vector) => vector,
        Err(e) => {
            warn!(%id, error = %e, "embedding generation failed");
            return (id, ItemOutcome::Failed);
        }
    };

    if let Err(e) = vectors.upsert(&id, vector, embedder.model()).await {
        warn!(%id, error = %e, "vector store write failed");
        return (id, ItemOutcome::Failed);
    }

    if let Err(e) = catalog.mark_embedded(&id, embedder.model(), epoch_now()).await {
        // The vector is stored; the next pass will retry the bookkeeping
        warn!(%id, error = %e, "embedding bookkeeping failed");
        return (id, ItemOutcome::Failed);
    }

    metrics.record_embedding_generated();
    (id, ItemOutcome::Embedded)
}
