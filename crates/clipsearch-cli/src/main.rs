//! clipsearch CLI - hybrid clip search administration
//!
//! # Usage
//!
//! ```bash
//! # Create the lexical index and vector collection
//! clipsearch init
//!
//! # Run a hybrid search
//! clipsearch search "apex clutch" --limit 10
//!
//! # Backfill missing embeddings once
//! clipsearch backfill --batch-size 50
//!
//! # Show catalog coverage and component health
//! clipsearch status
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// clipsearch - hybrid lexical + vector search over a clip corpus
#[derive(Parser, Debug)]
#[command(name = "clipsearch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Path to configuration file
    #[arg(long, short = 'c', global = true, env = "CLIPSEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the lexical index, vector collection and catalog database
    Init(commands::init::InitArgs),

    /// Run a hybrid search against the clip corpus
    Search(commands::search::SearchArgs),

    /// Generate embeddings for recent clips that are missing one
    Backfill(commands::backfill::BackfillArgs),

    /// Show catalog coverage and component health
    Status(commands::status::StatusArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.global.quiet {
        Level::ERROR
    } else if cli.global.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.global).await,
        Commands::Search(args) => commands::search::execute(args, cli.global).await,
        Commands::Backfill(args) => commands::backfill::execute(args, cli.global).await,
        Commands::Status(args) => commands::status::execute(args, cli.global).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn search_accepts_filters() {
        let cli = Cli::try_parse_from([
            "clipsearch",
            "search",
            "apex clutch",
            "--limit",
            "5",
            "--game",
            "Apex Legends",
            "--language",
            "en",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Search(_)));
    }

    #[test]
    fn config_flag_is_global() {
        let cli =
            Cli::try_parse_from(["clipsearch", "status", "--config", "/tmp/clip.toml"]).unwrap();
        assert_eq!(cli.global.config.as_deref(), Some(Path::new("/tmp/clip.toml")));
    }
}
