// src/cli/mod.rs
// CLI module, grounded on mira-server's cli/mod.rs: a `Cli`/`Commands` pair
// plus one module per subcommand.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod link;
pub mod rebuild;
pub mod verify;

#[derive(Parser)]
#[command(name = "convolink")]
#[command(about = "Conversation linking engine for an LLM-proxy telemetry store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Link a single JSON request envelope read from stdin
    Link {
        /// Sqlite database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Re-link every request in the store
    Rebuild {
        /// Compute and report changes without applying them
        #[arg(long)]
        dry_run: bool,

        /// Restrict the rebuild to one domain
        #[arg(long)]
        domain: Option<String>,

        /// Stop after this many requests
        #[arg(long)]
        limit: Option<usize>,

        /// Page size for the streaming cursor
        #[arg(long, default_value = "1000")]
        batch_size: usize,

        /// Sqlite database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Read-only integrity check (invariants 1-7), no writes
    Verify {
        /// Restrict the check to one domain
        #[arg(long)]
        domain: Option<String>,

        /// Sqlite database path (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}
