//! CLI argument parsing for the `atlas` binary.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Atlas
///
/// Verified local model cache and geo-filtered semantic search.
#[derive(Parser, Debug)]
#[command(name = "atlas")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/atlas/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the model cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download (if needed) and verify a model, then print its path
    Resolve {
        /// Model identifier from the registry
        model: String,
    },

    /// Show the registry entry for a model
    Lookup {
        /// Model identifier from the registry
        model: String,
    },

    /// Registry management commands
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },

    /// Print the digest of a local file
    Checksum {
        /// File to hash
        file: PathBuf,

        /// Digest algorithm
        #[arg(short, long, default_value = "sha256")]
        algorithm: String,
    },

    /// Embed a text and add it to the search index
    Add {
        /// Text to index
        text: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Override search database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Search indexed texts near a point
    Search {
        /// Query text
        query: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Radius in kilometres (inclusive)
        #[arg(short, long, default_value = "10")]
        radius: f64,

        /// Show at most this many results
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Override search database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Delete a model's cached files
    Purge {
        /// Model identifier from the registry
        model: String,
    },
}

/// Registry subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum RegistryCommands {
    /// Fetch and verify the remote registry
    Refresh,

    /// List models in the active registry
    List,
}
