//! Status command - catalog coverage and component health

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use clipsearch_core::Catalog;
use clipsearch_search::Embedder;

use super::{build_embedder, load_config, open_catalog};
use crate::GlobalOptions;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    json: bool,
}

/// Execute the status command
pub async fn execute(args: StatusArgs, global: GlobalOptions) -> Result<()> {
    let config = load_config(&global)?;

    let catalog = open_catalog(&config)?;
    let coverage = catalog
        .coverage()
        .await
        .context("failed to read embedding coverage")?;

    let embedder = build_embedder(&config)?;
    let status = match embedder.check_status().await {
        Ok(status) => status,
        Err(e) => clipsearch_search::EmbedderStatus::unavailable(
            config.embedding.model.clone(),
            e.to_string(),
        ),
    };

    if args.json {
        let payload = json!({
            "catalog": {
                "path": config.catalog.path,
                "embedded": coverage.embedded,
                "missing": coverage.missing,
                "coverage": coverage.ratio(),
            },
            "embedder": {
                "model": status.model,
                "available": status.available,
                "latency_ms": status.latency_ms,
                "error": status.error,
            },
            "lexical": {
                "url": config.lexical.url,
                "index": config.lexical.index,
            },
            "vector": {
                "url": config.vector.url,
                "collection": config.vector.collection,
                "dimension": config.vector.dimension,
            },
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Catalog");
    println!("  path:      {}", config.catalog.path.display());
    println!("  embedded:  {}", coverage.embedded);
    println!("  missing:   {}", coverage.missing);
    println!("  coverage:  {:.1}%", coverage.ratio() * 100.0);

    println!("\nEmbedding provider");
    println!("  model:     {}", status.model);
    if status.available {
        match status.latency_ms {
            Some(ms) => println!("  status:    available ({}ms)", ms),
            None => println!("  status:    available"),
        }
    } else {
        println!(
            "  status:    unavailable ({})",
            status.error.as_deref().unwrap_or("unknown error")
        );
    }

    println!("\nLexical index");
    println!("  url:       {}", config.lexical.url);
    println!("  index:     {}", config.lexical.index);

    println!("\nVector store");
    println!("  url:       {}", config.vector.url);
    println!("  collection: {}", config.vector.collection);
    println!("  dimension: {}", config.vector.dimension);

    Ok(())
}
