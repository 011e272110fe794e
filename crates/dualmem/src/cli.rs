//! CLI argument definitions using clap derive macros.
//!
//! Every command loads the memory directory, acts on it and saves it back
//! when state changed.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Dual memory CLI
///
/// A bounded working memory for the live conversation and a durable
/// knowledge store fed by a judged promotion pipeline.
#[derive(Parser, Debug)]
#[command(name = "dualmem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to $DUALMEM_CONFIG or the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Memory directory, overriding the configured one
    #[arg(long, global = true, env = "DUALMEM_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Append a message to the working memory
    Message {
        /// user, assistant or system
        role: String,
        /// Message text
        content: String,
    },

    /// Record a solution attempt (successful ones are judged immediately)
    Solution {
        problem: String,
        solution: String,
        /// Mark the attempt as successful
        #[arg(short, long)]
        successful: bool,
    },

    /// Record an error and its correction
    Correction { error: String, correction: String },

    /// Search both memories
    Search {
        query: String,
        /// Maximum results
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// Run a promotion pass over the working memory now
    Promote,

    /// Knowledge store operations
    Knowledge(KnowledgeCommand),

    /// Compress every long uncompressed entry
    Optimize,

    /// Show memory statistics
    Stats,

    /// Clear the working memory
    Clear,

    /// Print the effective configuration as TOML
    Config,
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct KnowledgeCommand {
    #[command(subcommand)]
    pub action: KnowledgeAction,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Add an entry
    Add {
        /// Entry title
        title: String,

        /// Entry content
        content: String,

        /// Category (e.g. laravel, php)
        #[arg(short, long, default_value = "general")]
        category: String,

        /// Subcategory
        #[arg(short, long)]
        subcategory: Option<String>,

        /// Tags (repeatable)
        #[arg(short = 'T', long = "tag", action = clap::ArgAction::Append)]
        tags: Vec<String>,

        /// Quality score (0.0 - 1.0)
        #[arg(short, long)]
        quality: Option<f64>,
    },

    /// Show an entry (decompressed unless --raw)
    Get {
        id: String,
        /// Show stored content without decompressing
        #[arg(long)]
        raw: bool,
    },

    /// Delete an entry
    Delete { id: String },

    /// Entries carrying the given tags
    Tags {
        #[arg(required = true)]
        tags: Vec<String>,
        /// Require every tag instead of any
        #[arg(long)]
        all: bool,
    },

    /// Entries in a category
    Category {
        category: String,
        #[arg(short, long)]
        subcategory: Option<String>,
    },

    /// Substring search over titles and content
    Text {
        query: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Link two entries
    Relate { a: String, b: String },

    /// Unlink two entries
    Unrelate { a: String, b: String },

    /// List categories and subcategories
    Categories,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_knowledge_add() {
        let cli = Cli::parse_from([
            "dualmem", "knowledge", "add", "Queues", "Use Horizon", "-c", "laravel", "-T", "queue",
            "-T", "redis",
        ]);
        let Commands::Knowledge(KnowledgeCommand {
            action: KnowledgeAction::Add { category, tags, .. },
        }) = cli.command
        else {
            panic!("expected knowledge add");
        };
        assert_eq!(category, "laravel");
        assert_eq!(tags, vec!["queue", "redis"]);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["dualmem", "search", "eager load", "-k", "3", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Search { top_k: 3, .. }));
    }
}
