//! Command implementations for the dualmem CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod knowledge;
pub mod memory;

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use dualmem_core::memory::truncate_chars;
use dualmem_core::types::KnowledgeEntry;
use dualmem_sdk::{MemorySystem, TracingSink};

use crate::cli::Commands;
use crate::config::Config;
use crate::judge::CommandJudge;

/// Execute a parsed command.
pub async fn execute(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Message { role, content } => memory::message(&role, &content, config).await,
        Commands::Solution {
            problem,
            solution,
            successful,
        } => memory::solution(&problem, &solution, successful, config).await,
        Commands::Correction { error, correction } => {
            memory::correction(&error, &correction, config).await
        }
        Commands::Search { query, top_k } => memory::search(&query, top_k, config).await,
        Commands::Promote => memory::promote(config).await,
        Commands::Knowledge(cmd) => knowledge::execute(cmd, config).await,
        Commands::Optimize => memory::optimize(config).await,
        Commands::Stats => memory::stats(config).await,
        Commands::Clear => memory::clear(config).await,
        Commands::Config => memory::show_config(config),
    }
}

/// Load the memory system for `config`, wired to the configured judge.
pub async fn open(config: &Config) -> Result<MemorySystem> {
    let dir = config.memory_dir();
    let judge = CommandJudge::new(config.judge.command.clone());
    if !judge.is_configured() {
        tracing::debug!("No judge command configured, promotion will discard candidates");
    }

    let system = MemorySystem::load(&dir, config.memory.clone())
        .await
        .with_context(|| format!("Failed to open memory at {}", dir.display()))?
        .with_judge(Arc::new(judge))
        .with_sink(Arc::new(TracingSink));
    Ok(system)
}

/// Save the memory system back to the configured directory.
pub async fn save(system: &MemorySystem, config: &Config) -> Result<()> {
    let dir = config.memory_dir();
    system
        .save(&dir)
        .await
        .with_context(|| format!("Failed to save memory to {}", dir.display()))
}

/// One-line summary of an entry.
fn print_entry_line(entry: &KnowledgeEntry) {
    let compressed = if entry.is_compressed() {
        " [compressed]".yellow().to_string()
    } else {
        String::new()
    };
    println!(
        "  {} {} {}{}",
        short_id(&entry.id).dimmed(),
        entry.title.bold(),
        format!("({})", entry.category).cyan(),
        compressed
    );
    println!("    {}", truncate_chars(&entry.content.replace('\n', " "), 100).dimmed());
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
