//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ragline",
    version,
    author = "neur0map",
    about = "Chunking, hybrid retrieval and embedding cache for RAG pipelines",
    long_about = "Ragline splits documents into retrieval-sized chunks, embeds them through a cached, \
                  rate-limited batch processor, and answers queries with a token-bounded, \
                  citation-annotated context built from hybrid vector and keyword search."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/ragline/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile from the config file to apply
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
    /// Split a text file into chunks
    Chunk {
        /// Text file to chunk
        file: PathBuf,

        /// Chunking strategy (sentence, paragraph, fixed, semantic)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Maximum chunk size in characters
        #[arg(long)]
        size: Option<usize>,

        /// Overlap between neighbouring chunks in characters
        #[arg(long)]
        overlap: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Index documents in memory and retrieve context for a question
    Query {
        /// Question text
        question: String,

        /// Document to index before querying (repeatable)
        #[arg(short, long = "doc", value_name = "FILE", required = true)]
        docs: Vec<PathBuf>,

        /// Number of chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Token budget for the assembled context
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Rerank candidates with the cross-encoder
        #[arg(long)]
        rerank: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage the persistent cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Remove every cache entry referencing a document
    Invalidate {
        /// Document id as used at indexing time
        document_id: String,
    },

    /// Delete expired entries
    Purge,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the configuration file location
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
