//! Init command - provision the lexical index, vector collection and catalog

use anyhow::{Context, Result};
use clap::Args;

use clipsearch_search::{LexicalIndex, VectorIndex};

use super::{build_lexical, connect_vectors, load_config, open_catalog};
use crate::GlobalOptions;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {}

/// Execute the init command
pub async fn execute(_args: InitArgs, global: GlobalOptions) -> Result<()> {
    let config = load_config(&global)?;

    let lexical = build_lexical(&config)?;
    lexical
        .ensure_index()
        .await
        .context("failed to create the lexical index")?;
    if !global.quiet {
        println!("Lexical index \"{}\" ready at {}", config.lexical.index, config.lexical.url);
    }

    let vectors = connect_vectors(&config).await?;
    vectors
        .ensure_collection()
        .await
        .context("failed to create the vector collection")?;
    if !global.quiet {
        println!(
            "Vector collection \"{}\" ready at {} (dimension {})",
            config.vector.collection, config.vector.url, config.vector.dimension
        );
    }

    open_catalog(&config)?;
    if !global.quiet {
        println!("Catalog database ready at {}", config.catalog.path.display());
    }

    Ok(())
}
