//! Knowledge store commands.
//!
//! Entries added here are user-curated and bypass the promotion pipeline.

use anyhow::Result;
use colored::Colorize;
use dualmem_core::types::{KnowledgeEntry, NewEntry, SourceType};
use dualmem_sdk::Retrieved;

use super::{open, print_entry_line, save};
use crate::cli::{KnowledgeAction, KnowledgeCommand};
use crate::config::Config;
use crate::error::CliError;

/// Execute knowledge command.
pub async fn execute(cmd: KnowledgeCommand, config: &Config) -> Result<()> {
    match cmd.action {
        KnowledgeAction::Add {
            title,
            content,
            category,
            subcategory,
            tags,
            quality,
        } => add(title, content, category, subcategory, tags, quality, config).await,
        KnowledgeAction::Get { id, raw } => get(&id, raw, config).await,
        KnowledgeAction::Delete { id } => delete(&id, config).await,
        KnowledgeAction::Tags { tags, all } => by_tags(&tags, all, config).await,
        KnowledgeAction::Category {
            category,
            subcategory,
        } => by_category(&category, subcategory.as_deref(), config).await,
        KnowledgeAction::Text { query, limit } => by_text(&query, limit, config).await,
        KnowledgeAction::Relate { a, b } => relate(&a, &b, true, config).await,
        KnowledgeAction::Unrelate { a, b } => relate(&a, &b, false, config).await,
        KnowledgeAction::Categories => categories(config).await,
    }
}

async fn add(
    title: String,
    content: String,
    category: String,
    subcategory: Option<String>,
    tags: Vec<String>,
    quality: Option<f64>,
    config: &Config,
) -> Result<()> {
    let mut entry = NewEntry::new(title.clone(), content, category.clone())
        .with_source(SourceType::Manual, None)
        .with_tags(tags.iter().cloned());
    if let Some(subcategory) = subcategory {
        entry = entry.with_subcategory(subcategory);
    }
    if let Some(quality) = quality {
        entry = entry.with_quality(quality.clamp(0.0, 1.0));
    }

    let system = open(config).await?;
    let ids = system.store_knowledge(vec![entry]).await;
    save(&system, config).await?;

    println!("{} Knowledge added", "✓".green());
    println!("  Title: {}", title.bold());
    println!("  Category: {}", category.cyan());
    if let Some(id) = ids.first() {
        println!("  ID: {}", id);
    }
    if !tags.is_empty() {
        println!("  Tags: {}", tags.join(", ").dimmed());
    }
    Ok(())
}

async fn get(id: &str, raw: bool, config: &Config) -> Result<()> {
    let system = open(config).await?;
    let Some(Retrieved::Entry(entry)) = system.retrieve(id, !raw).await else {
        return Err(CliError::EntryNotFound(id.to_string()).into());
    };
    // Retrieval counts as a use
    save(&system, config).await?;

    print_entry(&entry);
    Ok(())
}

async fn delete(id: &str, config: &Config) -> Result<()> {
    let system = open(config).await?;
    if !system.delete_entry(id).await {
        return Err(CliError::EntryNotFound(id.to_string()).into());
    }
    save(&system, config).await?;

    println!("{} Deleted {}", "✓".green(), id.dimmed());
    Ok(())
}

async fn by_tags(tags: &[String], all: bool, config: &Config) -> Result<()> {
    let system = open(config).await?;
    let knowledge = system.knowledge_snapshot().await;
    print_entries(&knowledge.search_by_tags(tags, all));
    Ok(())
}

async fn by_category(category: &str, subcategory: Option<&str>, config: &Config) -> Result<()> {
    let system = open(config).await?;
    let knowledge = system.knowledge_snapshot().await;
    print_entries(&knowledge.search_by_category(category, subcategory));
    Ok(())
}

async fn by_text(query: &str, limit: usize, config: &Config) -> Result<()> {
    let system = open(config).await?;
    let knowledge = system.knowledge_snapshot().await;
    let entries: Vec<&KnowledgeEntry> = knowledge
        .search_by_text(query)
        .into_iter()
        .take(limit)
        .map(|(entry, _)| entry)
        .collect();
    print_entries(&entries);
    Ok(())
}

async fn relate(a: &str, b: &str, link: bool, config: &Config) -> Result<()> {
    let system = open(config).await?;
    let changed = if link {
        system.add_relationship(a, b).await
    } else {
        system.remove_relationship(a, b).await
    };

    if !changed {
        println!(
            "{} Nothing changed (unknown id, same id, or no such link)",
            "•".yellow()
        );
        return Ok(());
    }
    save(&system, config).await?;

    let verb = if link { "Linked" } else { "Unlinked" };
    println!("{} {} {} and {}", "✓".green(), verb, a.dimmed(), b.dimmed());
    Ok(())
}

async fn categories(config: &Config) -> Result<()> {
    let system = open(config).await?;
    let knowledge = system.knowledge_snapshot().await;

    if knowledge.categories().is_empty() {
        println!("{}", "No categories".dimmed());
        return Ok(());
    }
    for (category, subcategories) in knowledge.categories() {
        let count = knowledge.search_by_category(category, None).len();
        println!("{} ({})", category.bold(), count);
        for subcategory in subcategories {
            println!("  - {}", subcategory);
        }
    }
    Ok(())
}

fn print_entries(entries: &[&KnowledgeEntry]) {
    if entries.is_empty() {
        println!("{}", "No entries".dimmed());
        return;
    }
    println!("{} {} entr{}", "→".cyan(), entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    for entry in entries {
        print_entry_line(entry);
    }
}

fn print_entry(entry: &KnowledgeEntry) {
    println!("{}", entry.title.bold());
    println!("  ID:       {}", entry.id.dimmed());
    match &entry.subcategory {
        Some(sub) => println!("  Category: {} / {}", entry.category.cyan(), sub),
        None => println!("  Category: {}", entry.category.cyan()),
    }
    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        println!("  Tags:     {}", tags.join(", "));
    }
    println!("  Source:   {}", entry.source_type);
    println!("  Quality:  {:.2}", entry.quality_score);
    println!(
        "  Usage:    {} uses, {} successes, {} failures",
        entry.usage.usage_count, entry.usage.success_count, entry.usage.failure_count
    );
    if let Some(info) = &entry.compression {
        println!(
            "  Compressed: {} ({} -> {} chars)",
            info.level, info.original_size, info.compressed_size
        );
    }
    if !entry.related_entries.is_empty() {
        let related: Vec<&str> = entry.related_entries.iter().map(String::as_str).collect();
        println!("  Related:  {}", related.join(", ").dimmed());
    }
    println!();
    println!("{}", entry.content);
}
