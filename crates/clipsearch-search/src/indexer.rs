//! Indexing pipeline
//!
//! Consumes change events from the catalog and keeps the lexical index and
//! vector store in line with them. Each job retries independently with
//! exponential backoff; a job that exhausts its attempts lands in the
//! dead-letter queue without blocking anything behind it.
//!
//! An upsert whose text changed clears the clip's embedding bookkeeping so
//! the backfill scheduler regenerates it. The pipeline itself never calls
//! the embedding provider.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use clipsearch_core::{
    epoch_now, Catalog, ChangeEvent, DeadLetterJob, IndexOp, IndexingJob, JobState,
};

use crate::error::{Result, SearchError};
use crate::lexical::LexicalIndex;
use crate::metrics::SearchMetrics;
use crate::vector::VectorIndex;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Attempts before a job is dead-lettered
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts (milliseconds)
    pub retry_base_delay_ms: u64,
    /// Jobs processed concurrently
    pub concurrency: usize,
    /// Queued jobs before submission backpressures
    pub queue_capacity: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 500,
            concurrency: 4,
            queue_capacity: 1024,
        }
    }
}

/// Shared sinks a job writes to.
#[derive(Clone)]
struct Stores {
    catalog: Arc<dyn Catalog>,
    lexical: Arc<dyn LexicalIndex>,
    vectors: Arc<dyn VectorIndex>,
}

/// Background pipeline applying catalog change events to the search indexes.
pub struct IndexingPipeline {
    tx: mpsc::Sender<IndexingJob>,
    dead_letters: Arc<Mutex<Vec<DeadLetterJob>>>,
    metrics: Arc<SearchMetrics>,
    worker: JoinHandle<()>,
}

impl IndexingPipeline {
    /// Start the pipeline. Jobs run until [`IndexingPipeline::close`].
    pub fn spawn(
        catalog: Arc<dyn Catalog>,
        lexical: Arc<dyn LexicalIndex>,
        vectors: Arc<dyn VectorIndex>,
        config: IndexerConfig,
        metrics: Arc<SearchMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let stores = Stores {
            catalog,
            lexical,
            vectors,
        };

        let worker = tokio::spawn(run_worker(
            rx,
            stores,
            config,
            Arc::clone(&dead_letters),
            Arc::clone(&metrics),
        ));

        Self {
            tx,
            dead_letters,
            metrics,
            worker,
        }
    }

    /// Enqueue a change event. Backpressures when the queue is full.
    pub async fn submit(&self, event: ChangeEvent) -> Result<()> {
        let job = match event {
            ChangeEvent::Upserted { id, text_changed } => {
                IndexingJob::new(id, IndexOp::Upsert { text_changed })
            }
            ChangeEvent::Deleted { id } => IndexingJob::new(id, IndexOp::Delete),
        };

        self.tx
            .send(job)
            .await
            .map_err(|_| SearchError::Lexical("indexing pipeline is shut down".into()))
    }

    /// Snapshot of jobs that exhausted their retries.
    pub fn dead_letters(&self) -> Vec<DeadLetterJob> {
        self.dead_letters.lock().clone()
    }

    /// Re-enqueue every dead-lettered job with a fresh attempt budget.
    pub async fn retry_dead_letters(&self) -> Result<usize> {
        let drained: Vec<DeadLetterJob> = std::mem::take(&mut *self.dead_letters.lock());
        let count = drained.len();

        for dead in drained {
            let job = IndexingJob::new(dead.job.id, dead.job.op);
            self.tx
                .send(job)
                .await
                .map_err(|_| SearchError::Lexical("indexing pipeline is shut down".into()))?;
        }

        if count > 0 {
            info!(count, "re-enqueued dead-lettered jobs");
        }
        Ok(count)
    }

    pub fn metrics(&self) -> &Arc<SearchMetrics> {
        &self.metrics
    }

    /// Stop accepting jobs and wait for in-flight work to finish.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(error = %e, "indexing worker panicked");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<IndexingJob>,
    stores: Stores,
    config: IndexerConfig,
    dead_letters: Arc<Mutex<Vec<DeadLetterJob>>>,
    metrics: Arc<SearchMetrics>,
) {
    let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks = Vec::new();

    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };

        let stores = stores.clone();
        let config = config.clone();
        let dead_letters = Arc::clone(&dead_letters);
        let metrics = Arc::clone(&metrics);

        tasks.push(tokio::spawn(async move {
            let _permit = permit;
            run_job(job, stores, config, dead_letters, metrics).await;
        }));

        // Drop handles for finished tasks so the list stays bounded
        tasks.retain(|t| !t.is_finished());
    }

    for task in tasks {
        let _ = task.await;
    }
}

/// Run one job through its retry budget.
async fn run_job(
    mut job: IndexingJob,
    stores: Stores,
    config: IndexerConfig,
    dead_letters: Arc<Mutex<Vec<DeadLetterJob>>>,
    metrics: Arc<SearchMetrics>,
) {
    let mut delay = Duration::from_millis(config.retry_base_delay_ms);

    loop {
        job.attempts += 1;
        match apply(&job, &stores).await {
            Ok(()) => {
                debug!(id = %job.id, op = ?job.op, attempts = job.attempts, "job applied");
                metrics.record_job_completed();
                return;
            }
            Err(e) if job.attempts < config.max_attempts => {
                warn!(id = %job.id, attempt = job.attempts, error = %e, "job failed, retrying");
                job.state = JobState::Retrying(job.attempts);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                error!(id = %job.id, attempts = job.attempts, error = %e, "job dead-lettered");
                job.state = JobState::DeadLettered;
                metrics.record_job_dead_lettered();
                dead_letters.lock().push(DeadLetterJob {
                    job,
                    error: e.to_string(),
                    failed_at: epoch_now(),
                });
                return;
            }
        }
    }
}

/// Apply a single attempt of a job to the stores.
async fn apply(job: &IndexingJob, stores: &Stores) -> Result<()> {
    match job.op {
        IndexOp::Upsert { text_changed } => {
            // A document gone or soft-removed by the time the job runs is
            // treated as a delete; re-running the job stays idempotent.
            let Some(doc) = stores.catalog.fetch(&job.id).await? else {
                return remove(job, stores).await;
            };

            stores.lexical.upsert(&doc).await?;

            if text_changed && doc.has_embedding() {
                // Stale vector: hand it back to the backfill scheduler
                stores.catalog.clear_embedding(&job.id).await?;
                stores.vectors.delete(std::slice::from_ref(&job.id)).await?;
            }
            Ok(())
        }
        IndexOp::Delete => remove(job, stores).await,
    }
}

async fn remove(job: &IndexingJob, stores: &Stores) -> Result<()> {
    stores.lexical.delete(&job.id).await?;
    stores.vectors.delete(std::slice::from_ref(&job.id)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use clipsearch_core::{ClipDocument, ItemId, MemoryCatalog, SearchFilters};

    use crate::lexical::LexicalHit;

    #[derive(Default)]
    struct RecordingLexical {
        upserts: Mutex<Vec<ItemId>>,
        deletes: Mutex<Vec<ItemId>>,
        fail_first: AtomicUsize,
    }

    impl RecordingLexical {
        fn failing_times(n: usize) -> Self {
            Self {
                fail_first: AtomicUsize::new(n),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl LexicalIndex for RecordingLexical {
        async fn search(
            &self,
            _query: &str,
            _filters: &SearchFilters,
            _size: usize,
        ) -> Result<Vec<LexicalHit>> {
            Ok(vec![])
        }

        async fn upsert(&self, doc: &ClipDocument) -> Result<()> {
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SearchError::Lexical("injected".into()));
            }
            self.upserts.lock().push(doc.id.clone());
            Ok(())
        }

        async fn delete(&self, id: &ItemId) -> Result<()> {
            self.deletes.lock().push(id.clone());
            Ok(())
        }

        async fn bulk_upsert(&self, _docs: &[ClipDocument]) -> Result<()> {
            Ok(())
        }

        async fn ensure_index(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingVectors {
        deletes: Mutex<Vec<ItemId>>,
    }

    #[async_trait]
    impl VectorIndex for RecordingVectors {
        async fn ensure_collection(&self) -> Result<()> {
            Ok(())
        }

        async fn fetch(&self, _ids: &[ItemId]) -> Result<HashMap<ItemId, Vec<f32>>> {
            Ok(HashMap::new())
        }

        async fn upsert(&self, _id: &ItemId, _vector: Vec<f32>, _model: &str) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, ids: &[ItemId]) -> Result<()> {
            self.deletes.lock().extend(ids.iter().cloned());
            Ok(())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn fast_config() -> IndexerConfig {
        IndexerConfig {
            max_attempts: 3,
            retry_base_delay_ms: 1,
            concurrency: 2,
            queue_capacity: 16,
        }
    }

    fn pipeline_with(
        catalog: Arc<MemoryCatalog>,
        lexical: Arc<RecordingLexical>,
        vectors: Arc<RecordingVectors>,
    ) -> IndexingPipeline {
        IndexingPipeline::spawn(
            catalog,
            lexical,
            vectors,
            fast_config(),
            Arc::new(SearchMetrics::new()),
        )
    }

    #[tokio::test]
    async fn upsert_event_writes_to_lexical_index() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert(ClipDocument::new("a", "title"));
        let lexical = Arc::new(RecordingLexical::default());
        let vectors = Arc::new(RecordingVectors::default());

        let pipeline = pipeline_with(catalog, Arc::clone(&lexical), vectors);
        pipeline
            .submit(ChangeEvent::Upserted {
                id: ItemId::from("a"),
                text_changed: false,
            })
            .await
            .unwrap();
        pipeline.close().await;

        assert_eq!(lexical.upserts.lock().as_slice(), &[ItemId::from("a")]);
    }

    #[tokio::test]
    async fn text_change_clears_stale_embedding() {
        let catalog = Arc::new(MemoryCatalog::new());
        let mut doc = ClipDocument::new("a", "new title");
        doc.embedded_at = Some(100);
        doc.embedding_model = Some("m".into());
        catalog.insert(doc);

        let lexical = Arc::new(RecordingLexical::default());
        let vectors = Arc::new(RecordingVectors::default());
        let pipeline = pipeline_with(Arc::clone(&catalog), lexical, Arc::clone(&vectors));

        pipeline
            .submit(ChangeEvent::Upserted {
                id: ItemId::from("a"),
                text_changed: true,
            })
            .await
            .unwrap();
        pipeline.close().await;

        let doc = catalog.fetch(&"a".into()).await.unwrap().unwrap();
        assert!(!doc.has_embedding());
        assert_eq!(vectors.deletes.lock().as_slice(), &[ItemId::from("a")]);
    }

    #[tokio::test]
    async fn delete_event_removes_from_both_stores() {
        let catalog = Arc::new(MemoryCatalog::new());
        let lexical = Arc::new(RecordingLexical::default());
        let vectors = Arc::new(RecordingVectors::default());

        let pipeline = pipeline_with(catalog, Arc::clone(&lexical), Arc::clone(&vectors));
        pipeline
            .submit(ChangeEvent::Deleted {
                id: ItemId::from("gone"),
            })
            .await
            .unwrap();
        pipeline.close().await;

        assert_eq!(lexical.deletes.lock().as_slice(), &[ItemId::from("gone")]);
        assert_eq!(vectors.deletes.lock().as_slice(), &[ItemId::from("gone")]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_to_success() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert(ClipDocument::new("a", "title"));
        let lexical = Arc::new(RecordingLexical::failing_times(2));
        let vectors = Arc::new(RecordingVectors::default());

        let pipeline = pipeline_with(catalog, Arc::clone(&lexical), vectors);
        pipeline
            .submit(ChangeEvent::Upserted {
                id: ItemId::from("a"),
                text_changed: false,
            })
            .await
            .unwrap();
        // Keep a handle to the queue: close() consumes the pipeline
        let dead_letters = Arc::clone(&pipeline.dead_letters);
        pipeline.close().await;

        assert_eq!(lexical.upserts.lock().len(), 1);
        assert!(dead_letters.lock().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_the_job() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert(ClipDocument::new("a", "title"));
        let lexical = Arc::new(RecordingLexical::failing_times(99));
        let vectors = Arc::new(RecordingVectors::default());

        let metrics = Arc::new(SearchMetrics::new());
        let pipeline = IndexingPipeline::spawn(
            catalog,
            lexical,
            vectors,
            fast_config(),
            Arc::clone(&metrics),
        );
        pipeline
            .submit(ChangeEvent::Upserted {
                id: ItemId::from("a"),
                text_changed: false,
            })
            .await
            .unwrap();

        // Wait for the job to run out of attempts
        for _ in 0..100 {
            if !pipeline.dead_letters().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let dead = pipeline.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempts, 3);
        assert!(matches!(dead[0].job.state, JobState::DeadLettered));
        assert_eq!(metrics.snapshot().jobs_dead_lettered, 1);
        pipeline.close().await;
    }

    #[tokio::test]
    async fn dead_letters_can_be_requeued() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert(ClipDocument::new("a", "title"));
        // Fails the first 3 attempts (dead letter), then succeeds on requeue
        let lexical = Arc::new(RecordingLexical::failing_times(3));
        let vectors = Arc::new(RecordingVectors::default());

        let pipeline = pipeline_with(catalog, Arc::clone(&lexical), vectors);
        pipeline
            .submit(ChangeEvent::Upserted {
                id: ItemId::from("a"),
                text_changed: false,
            })
            .await
            .unwrap();

        for _ in 0..100 {
            if !pipeline.dead_letters().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pipeline.dead_letters().len(), 1);

        let requeued = pipeline.retry_dead_letters().await.unwrap();
        assert_eq!(requeued, 1);
        pipeline.close().await;

        assert_eq!(lexical.upserts.lock().len(), 1);
    }
}
