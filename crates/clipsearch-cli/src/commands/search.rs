//! Search command - hybrid lexical + vector clip search

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use clipsearch_core::{SearchFilters, SearchRequest};

use super::{build_searcher, load_config};
use crate::GlobalOptions;

/// Arguments for the search command
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query. Empty string browses by engagement and recency.
    query: String,

    /// Maximum number of results to return
    #[arg(long, short = 'n', default_value = "20")]
    limit: usize,

    /// Restrict results to a single game
    #[arg(long)]
    game: Option<String>,

    /// Restrict results to a language code (e.g., "en")
    #[arg(long)]
    language: Option<String>,

    /// Include clips flagged NSFW
    #[arg(long)]
    include_nsfw: bool,

    /// Output format: text (default), json
    #[arg(long, short = 'o', default_value = "text")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Execute the search command
pub async fn execute(args: SearchArgs, global: GlobalOptions) -> Result<()> {
    let config = load_config(&global)?;
    let searcher = build_searcher(&config).await?;

    let mut request = SearchRequest::new(&args.query).with_limit(args.limit);
    request.filters = SearchFilters {
        game_name: args.game.clone(),
        language: args.language.clone(),
        include_nsfw: args.include_nsfw,
    };

    let results = searcher.search(&request).await.context("search failed")?;

    match args.output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&results)
                .context("failed to serialize results")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            if results.results.is_empty() {
                if !global.quiet {
                    eprintln!("No results found for: {}", args.query);
                }
                return Ok(());
            }

            if !global.quiet {
                let mode = if results.meta.used_fallback {
                    "lexical only"
                } else {
                    "hybrid"
                };
                println!(
                    "Found {} results for \"{}\" ({}, {} candidates, {}ms):\n",
                    results.results.len(),
                    results.query,
                    mode,
                    results.meta.total_candidates,
                    results.meta.elapsed_ms
                );
            }

            for clip in &results.results {
                let marker = if clip.degraded { " *" } else { "" };
                println!("{:>3}. {}  score={:.4}{}", clip.rank, clip.id, clip.score, marker);
            }

            if !global.quiet && results.results.iter().any(|c| c.degraded) {
                println!("\n* ranked without vector similarity");
            }
        }
    }

    Ok(())
}
