//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "docsift",
    version,
    about = "Hybrid document retrieval: dense + lexical search with cross-encoder reranking",
    long_about = "docsift indexes a directory of text, PDF, DOCX, PPTX and XLSX files into \
                  overlapping chunks, keeps an incremental on-disk cache, and answers queries \
                  by fusing vector similarity with keyword scoring before reranking."
)]
pub struct Cli {
    /// Config file path (defaults to ~/.config/docsift/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory to index (defaults to the current directory)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index (or incrementally update) the root directory
    Build,

    /// Search indexed documents
    Search {
        /// Search query text
        query: String,

        /// Maximum number of chunks to return (defaults to retrieval.default_top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Answer a question from the indexed documents (requires llm.enabled)
    Ask {
        /// Question to ask
        question: String,
    },

    /// Show cache statistics for the root directory
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
