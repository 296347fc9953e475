//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Configuration file picked up from the working directory when `--config`
/// is not given.
pub const DEFAULT_CONFIG_FILE: &str = "mnemo.toml";

#[derive(Debug, Parser)]
#[command(name = "mnemo")]
#[command(about = "Episodic memory store for conversational agents")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short, env = "MNEMO_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override `storage.data_dir`
    #[arg(long, env = "MNEMO_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override `embedding.provider` (hashing, stub, ollama, openai)
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Feed one conversation turn to memory formation
    Observe {
        /// The user's message (`-` reads stdin)
        message: String,

        /// The agent's reply, if any
        #[arg(long, short)]
        response: Option<String>,
    },

    /// Retrieve memories relevant to a query
    Recall {
        /// Query text
        query: String,

        /// Maximum memories to return (defaults to `retrieval.top_k`)
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },

    /// Memories most similar to an existing memory
    Related {
        /// Memory id
        id: u64,

        /// Maximum memories to return
        #[arg(long, short = 'k', default_value_t = 5)]
        top_k: usize,
    },

    /// Show store statistics
    Stats {
        /// Emit engine counters in Prometheus text format
        #[arg(long)]
        prometheus: bool,
    },

    /// Expire stale reinforcement candidates
    Gc,
}
