//! Atlas
//!
//! Verified local model cache and geo-filtered semantic search.
//!
//! # Usage
//!
//! ```bash
//! atlas resolve all-minilm-l6-v2
//! atlas registry refresh
//! atlas add "Corner coffee roaster" --lat -33.92 --lng 18.42
//! atlas search "espresso" --lat -33.93 --lng 18.41 --radius 5
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/atlas/config.toml)
//! 3. Environment variables (ATLAS_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use atlas_daemon::{
    handle_add, handle_checksum, handle_lookup, handle_purge, handle_registry, handle_resolve,
    handle_search, init_logging, load_settings, shutdown_token, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_logging(&settings.log_level)?;

    let ct = shutdown_token();

    match cli.command {
        Commands::Resolve { model } => {
            handle_resolve(&settings, &model, &ct).await?;
        }
        Commands::Lookup { model } => {
            handle_lookup(&settings, &model, &ct).await?;
        }
        Commands::Registry { command } => {
            handle_registry(&settings, command, &ct).await?;
        }
        Commands::Checksum { file, algorithm } => {
            handle_checksum(&file, &algorithm).await?;
        }
        Commands::Add {
            text,
            lat,
            lng,
            db_path,
        } => {
            handle_add(&settings, &text, lat, lng, db_path.as_deref(), &ct).await?;
        }
        Commands::Search {
            query,
            lat,
            lng,
            radius,
            limit,
            db_path,
        } => {
            handle_search(
                &settings,
                &query,
                lat,
                lng,
                radius,
                limit,
                db_path.as_deref(),
                &ct,
            )
            .await?;
        }
        Commands::Purge { model } => {
            handle_purge(&settings, &model, &ct).await?;
        }
    }

    Ok(())
}
