//! Working memory, search, promotion and maintenance commands.

use anyhow::Result;
use colored::Colorize;
use dualmem_core::memory::truncate_chars;
use dualmem_core::types::{ItemSource, Role};
use dualmem_sdk::{ConfidenceLevel, PromotionReport};

use super::{open, save};
use crate::config::Config;
use crate::error::CliError;

/// Append a message.
pub async fn message(role: &str, content: &str, config: &Config) -> Result<()> {
    let role = Role::from_str(&role.to_lowercase())
        .ok_or_else(|| CliError::InvalidRole(role.to_string()))?;

    let system = open(config).await?;
    let id = system.add_message(role, content).await;
    save(&system, config).await?;

    println!("{} Added {} message", "✓".green(), role.as_str().cyan());
    println!("  ID: {}", id.dimmed());
    Ok(())
}

/// Record a solution attempt.
pub async fn solution(problem: &str, solution: &str, successful: bool, config: &Config) -> Result<()> {
    let system = open(config).await?;
    let report = system
        .record_solution_attempt(problem, solution, successful)
        .await;
    save(&system, config).await?;

    if successful {
        println!("{} Recorded successful solution", "✓".green());
    } else {
        println!("{} Recorded failed attempt", "•".yellow());
    }
    if let Some(report) = report {
        print_report(&report);
    }
    Ok(())
}

/// Record an error correction.
pub async fn correction(error: &str, correction: &str, config: &Config) -> Result<()> {
    let system = open(config).await?;
    system.record_error_correction(error, correction).await;
    save(&system, config).await?;

    println!("{} Recorded error correction", "✓".green());
    Ok(())
}

/// Search both memories.
pub async fn search(query: &str, top_k: usize, config: &Config) -> Result<()> {
    let system = open(config).await?;
    let hits = system.search(query, top_k).await;

    if hits.is_empty() {
        println!("{}", "No results".dimmed());
        return Ok(());
    }

    println!("{} {} result(s) for {}", "→".cyan(), hits.len(), query.bold());
    for (rank, hit) in hits.iter().enumerate() {
        let source = match hit.item.source {
            ItemSource::Working => "working".blue(),
            ItemSource::Knowledge => "knowledge".magenta(),
        };
        let confidence = match hit.confidence {
            ConfidenceLevel::High => "high".green(),
            ConfidenceLevel::Medium => "medium".yellow(),
            ConfidenceLevel::Low => "low".red(),
            ConfidenceLevel::Insufficient => "insufficient".dimmed(),
        };
        println!(
            "{:>3}. {:.2} {} [{}] {}",
            rank + 1,
            hit.score,
            source,
            confidence,
            hit.item.title.as_deref().unwrap_or("").bold()
        );
        println!(
            "     {}",
            truncate_chars(&hit.item.content.replace('\n', " "), 100).dimmed()
        );
        println!("     {}", hit.item.id.dimmed());
    }
    Ok(())
}

/// Run a promotion pass.
pub async fn promote(config: &Config) -> Result<()> {
    let system = open(config).await?;
    println!("{} Analyzing working memory...", "→".cyan());
    let report = system.promote_now().await;
    save(&system, config).await?;

    print_report(&report);
    Ok(())
}

/// Compress every eligible entry.
pub async fn optimize(config: &Config) -> Result<()> {
    let system = open(config).await?;
    let report = system.optimize_all().await;
    save(&system, config).await?;

    println!(
        "{} Compressed {} of {} entries",
        "✓".green(),
        report.compressed_entries,
        report.total_entries
    );
    if report.compressed_entries > 0 {
        println!(
            "  Saved {} chars ({:.0}% of original size)",
            report.chars_saved,
            report.ratio * 100.0
        );
    }
    Ok(())
}

/// Show statistics.
pub async fn stats(config: &Config) -> Result<()> {
    let system = open(config).await?;
    let stats = system.stats().await;

    println!("{}", "Working memory".bold());
    println!("  Session:   {}", stats.session_id.dimmed());
    println!(
        "  Messages:  {}/{}",
        stats.working_messages, stats.working_capacity
    );
    println!(
        "  Next analysis in {} message(s)",
        config
            .memory
            .promotion
            .auto_analyze_frequency
            .saturating_sub(stats.message_counter)
    );
    println!("{}", "Knowledge store".bold());
    println!("  Entries:    {}", stats.knowledge_entries);
    println!("  Categories: {}", stats.categories);
    println!("  Tags:       {}", stats.tags);
    println!(
        "  Auto-compress: {}",
        if stats.auto_compress {
            "on".green()
        } else {
            "off".yellow()
        }
    );
    Ok(())
}

/// Clear the working memory.
pub async fn clear(config: &Config) -> Result<()> {
    let system = open(config).await?;
    system.clear_working().await;
    save(&system, config).await?;

    println!("{} Working memory cleared", "✓".green());
    Ok(())
}

/// Print the effective configuration.
pub fn show_config(config: &Config) -> Result<()> {
    println!("# {}", Config::config_path().display());
    print!("{}", config.to_toml()?);
    Ok(())
}

fn print_report(report: &PromotionReport) {
    if report.candidates == 0 {
        println!("  {}", "Nothing to promote".dimmed());
        return;
    }
    println!(
        "  Candidates: {}  Promoted: {}  Discarded: {}  Duplicates: {}",
        report.candidates,
        report.promoted.len().to_string().green(),
        report.discarded,
        report.duplicates
    );
    if report.judge_failures > 0 {
        println!(
            "  {} {} candidate(s) not judged (judge unavailable)",
            "!".yellow(),
            report.judge_failures
        );
    }
    for id in &report.promoted {
        println!("  {} {}", "+".green(), id.dimmed());
    }
}
