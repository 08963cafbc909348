use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod errors;
mod handlers;
mod validation;

pub use errors::{CliError, CliResult};
pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about = "Semantic search over a chat log", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed a JSONL chat log and publish it as the live index.
    /// Replaces the previous index only once the build has succeeded.
    Index {
        /// Path to the newline-delimited JSON log
        log: PathBuf,
    },

    /// Find messages similar to a query
    Search {
        query: String,

        /// Number of results (defaults to search.default_top_k)
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Only messages by this role (user or assistant)
        #[clap(short, long)]
        role: Option<String>,

        /// Only messages at or after this time (YYYY-MM-DD or RFC 3339)
        #[clap(long)]
        since: Option<String>,

        /// Only messages at or before this time (a bare date covers the whole day)
        #[clap(long)]
        until: Option<String>,

        /// Only messages from this conversation
        #[clap(short, long)]
        conversation: Option<String>,
    },

    /// Show topic clusters of the indexed messages
    Clusters {
        /// Recompute with this many clusters
        #[clap(short = 'n', long)]
        count: Option<usize>,

        /// Recompute with this seed
        #[clap(short, long)]
        seed: Option<u64>,
    },

    /// Corpus statistics
    Stats {},

    /// Print one conversation as a transcript
    Thread {
        conversation_id: String,

        /// Emit JSON instead of text
        #[clap(long)]
        json: bool,
    },
}
