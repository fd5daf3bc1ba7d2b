//! Atlas command-line library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (resolve, registry, search, ...)
//! - `progress`: Console rendering of download progress

pub mod cli;
pub mod commands;
pub mod progress;

pub use cli::{Cli, Commands, RegistryCommands};
pub use commands::{
    handle_add, handle_checksum, handle_lookup, handle_purge, handle_registry, handle_resolve,
    handle_search, init_logging, load_settings, shutdown_token,
};
