//! Backfill command - generate embeddings for clips that are missing one

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use clipsearch_core::Catalog;
use clipsearch_search::{BackfillConfig, BackfillScheduler, Embedder, SearchMetrics, VectorIndex};

use super::{build_embedder, connect_vectors, load_config, open_catalog};
use crate::GlobalOptions;

/// Arguments for the backfill command
#[derive(Args, Debug)]
pub struct BackfillArgs {
    /// Clips per batch (overrides the configured batch size)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Stop after embedding this many clips
    #[arg(long)]
    limit: Option<usize>,

    /// Keep running, sweeping recent clips on the configured interval
    #[arg(long, short = 'w')]
    watch: bool,
}

/// Execute the backfill command
pub async fn execute(args: BackfillArgs, global: GlobalOptions) -> Result<()> {
    let config = load_config(&global)?;

    let catalog: Arc<dyn Catalog> = Arc::new(open_catalog(&config)?);
    let embedder: Arc<dyn Embedder> = Arc::new(build_embedder(&config)?);
    let vectors: Arc<dyn VectorIndex> = Arc::new(connect_vectors(&config).await?);

    let batch_size = args.batch_size.unwrap_or(config.backfill.batch_size);
    let backfill_config = BackfillConfig {
        interval: Duration::from_secs(config.backfill.interval_secs),
        lookback: Duration::from_secs(config.backfill.lookback_days * 24 * 60 * 60),
        batch_size,
        concurrency: config.backfill.concurrency,
    };

    let scheduler = Arc::new(BackfillScheduler::new(
        catalog,
        embedder,
        vectors,
        backfill_config,
        Arc::new(SearchMetrics::new()),
    ));

    if args.watch {
        if !global.quiet {
            println!(
                "Backfilling every {}s, Ctrl-C to stop",
                config.backfill.interval_secs
            );
        }
        let handle = scheduler.spawn();
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        handle.abort();
        return Ok(());
    }

    // A manual invocation is a recovery action: sweep regardless of clip age
    let report = scheduler
        .run_forced(batch_size, args.limit)
        .await
        .context("backfill pass failed")?;
    if !global.quiet {
        println!(
            "Backfill complete: {} scanned, {} embedded, {} skipped, {} failed",
            report.scanned, report.embedded, report.skipped, report.failed
        );
    }
    if report.failed > 0 {
        anyhow::bail!("{} clips failed to embed", report.failed);
    }

    Ok(())
}
