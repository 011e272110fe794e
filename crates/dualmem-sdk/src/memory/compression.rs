//! Reversible compression of knowledge entries.
//!
//! Text is summarized extractively: paragraphs are scored and the best
//! fraction kept (headings always, lists unless aggressive), long kept
//! paragraphs are thinned sentence by sentence, and runs of dropped
//! paragraphs collapse into a single marker. Code is kept verbatim unless
//! `preserve_code` is off, in which case blank lines and unmarked comment
//! lines go. Mixed content is split on fenced blocks and each part handled
//! by its own rule.
//!
//! The summary never replaces the original: a compressed entry carries an
//! [`OriginalVersion`] and [`Compressor::decompress`] is a lookup of it.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use dualmem_core::types::{
    CompressionInfo, CompressionLevel, ContentKind, KnowledgeEntry, OriginalVersion,
};

use crate::config::CompressionConfig;

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\n(.*?)\n?```").unwrap());

static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`\n]+`").unwrap());

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*([-*+]|\d+\.)\s+").unwrap());

const SUMMARIZED_MARKER: &str = "... [content summarized] ...";
const SKIPPED_SENTENCES: &str = "...";

const IMPORTANCE_MARKERS: &[&str] = &[
    "key", "important", "essential", "critical", "necessary", "crucial", "significant",
    "fundamental", "vital", "main", "primary", "core", "in summary", "to summarize",
    "in conclusion", "therefore", "thus", "consequently", "as a result", "finally", "notably",
    "specifically",
];

const KEPT_COMMENT_MARKERS: &[&str] = &["todo", "note", "important", "warning", "fixme", "hack"];

const CODE_RATIO: f64 = 0.7;
const MIXED_RATIO: f64 = 0.3;

/// Per-level retention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelParams {
    pub paragraph_ratio: f64,
    pub sentence_ratio: f64,
    pub preserve_lists: bool,
}

impl LevelParams {
    pub fn for_level(level: CompressionLevel) -> Self {
        match level {
            CompressionLevel::Minimal => Self {
                paragraph_ratio: 0.9,
                sentence_ratio: 0.8,
                preserve_lists: true,
            },
            CompressionLevel::Balanced => Self {
                paragraph_ratio: 0.7,
                sentence_ratio: 0.7,
                preserve_lists: true,
            },
            CompressionLevel::Aggressive => Self {
                paragraph_ratio: 0.5,
                sentence_ratio: 0.5,
                preserve_lists: false,
            },
        }
    }
}

/// Cumulative compression counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub items_compressed: u64,
    pub chars_before: u64,
    pub chars_after: u64,
    pub chars_saved: u64,
    pub ratio: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone)]
pub struct Compressor {
    level: CompressionLevel,
    preserve_code: bool,
    max_summary_ratio: f64,
    items_compressed: u64,
    chars_before: u64,
    chars_after: u64,
}

impl Compressor {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            level: config.level,
            preserve_code: config.preserve_code,
            max_summary_ratio: config.max_summary_ratio,
            items_compressed: 0,
            chars_before: 0,
            chars_after: 0,
        }
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn set_level(&mut self, level: CompressionLevel) {
        self.level = level;
    }

    /// Compress `entry`, detecting its content kind unless `kind` is given.
    ///
    /// An entry that was compressed before is summarized again from its
    /// original, and that original is kept.
    pub fn compress(&mut self, entry: &KnowledgeEntry, kind: Option<ContentKind>) -> KnowledgeEntry {
        let original = entry
            .original_version
            .clone()
            .unwrap_or_else(|| OriginalVersion {
                content: entry.content.clone(),
                size: entry.content.chars().count(),
                timestamp: Utc::now(),
            });
        let source = original.content.as_str();
        let original_size = source.chars().count();

        let kind = kind.unwrap_or_else(|| detect_content_kind(source, &entry.category));
        let mut level = self.level;
        let mut summary = self.compress_content(source, kind, level);

        if level != CompressionLevel::Aggressive
            && original_size > 0
            && summary.chars().count() as f64 / original_size as f64 > self.max_summary_ratio
        {
            level = CompressionLevel::Aggressive;
            summary = self.compress_content(source, kind, level);
        }

        let mut compressed_size = summary.chars().count();
        if compressed_size > original_size {
            summary = source.to_string();
            compressed_size = original_size;
        }

        self.items_compressed += 1;
        self.chars_before += original_size as u64;
        self.chars_after += compressed_size as u64;

        tracing::debug!(
            entry_id = %entry.id,
            kind = %kind,
            level = %level,
            original_size,
            compressed_size,
            "Compressed entry"
        );

        let mut compressed = entry.clone();
        compressed.content = summary;
        compressed.compression = Some(CompressionInfo {
            kind,
            level,
            original_size,
            compressed_size,
            ratio: if original_size > 0 {
                compressed_size as f64 / original_size as f64
            } else {
                1.0
            },
            timestamp: Utc::now(),
            decompressed_at: None,
        });
        compressed.original_version = Some(original);
        compressed
    }

    /// Restore the original content. Entries never compressed come back unchanged.
    pub fn decompress(&self, entry: &KnowledgeEntry) -> KnowledgeEntry {
        let mut restored = entry.clone();
        if let Some(original) = &entry.original_version {
            restored.content = original.content.clone();
            if let Some(info) = restored.compression.as_mut() {
                info.decompressed_at = Some(Utc::now());
            }
        }
        restored
    }

    pub fn compress_content(&self, content: &str, kind: ContentKind, level: CompressionLevel) -> String {
        match kind {
            ContentKind::Text => compress_text(content, LevelParams::for_level(level)),
            ContentKind::Code => self.compress_code(content),
            ContentKind::Mixed => self.compress_mixed(content, LevelParams::for_level(level)),
        }
    }

    fn compress_code(&self, content: &str) -> String {
        if self.preserve_code {
            return content.to_string();
        }
        if !FENCED_BLOCK.is_match(content) {
            if ["def ", "function ", "class "].iter().any(|k| content.contains(k)) {
                return strip_code(content);
            }
            return content.to_string();
        }
        FENCED_BLOCK
            .replace_all(content, |caps: &regex::Captures<'_>| {
                format!("```{}\n{}\n```", &caps[1], strip_code(&caps[2]))
            })
            .into_owned()
    }

    fn compress_mixed(&self, content: &str, params: LevelParams) -> String {
        fn push_text(text: &str, params: LevelParams, parts: &mut Vec<String>) {
            if !text.trim().is_empty() {
                parts.push(compress_text(text.trim(), params));
            }
        }

        let mut parts = Vec::new();
        let mut cursor = 0;
        for caps in FENCED_BLOCK.captures_iter(content) {
            let Some(block) = caps.get(0) else { continue };
            push_text(&content[cursor..block.start()], params, &mut parts);
            if self.preserve_code {
                parts.push(block.as_str().to_string());
            } else {
                parts.push(format!("```{}\n{}\n```", &caps[1], strip_code(&caps[2])));
            }
            cursor = block.end();
        }
        push_text(&content[cursor..], params, &mut parts);

        parts.join("\n\n")
    }

    pub fn stats(&self) -> CompressionStats {
        let ratio = if self.chars_before > 0 {
            self.chars_after as f64 / self.chars_before as f64
        } else {
            0.0
        };
        CompressionStats {
            items_compressed: self.items_compressed,
            chars_before: self.chars_before,
            chars_after: self.chars_after,
            chars_saved: self.chars_before.saturating_sub(self.chars_after),
            ratio,
            percentage: if self.chars_before > 0 {
                (1.0 - ratio) * 100.0
            } else {
                0.0
            },
        }
    }
}

/// Classify content by category name, then by the share of code characters.
pub fn detect_content_kind(content: &str, category: &str) -> ContentKind {
    let category = category.to_lowercase();
    if category.contains("code") || category.contains("implementation") {
        return ContentKind::Code;
    }

    let total = content.chars().count();
    if total == 0 {
        return ContentKind::Text;
    }

    let fenced: usize = FENCED_BLOCK
        .find_iter(content)
        .map(|m| m.as_str().chars().count())
        .sum();
    let outside = FENCED_BLOCK.replace_all(content, "");
    let inline: usize = INLINE_CODE
        .find_iter(&outside)
        .map(|m| m.as_str().chars().count())
        .sum();

    let ratio = (fenced + inline) as f64 / total as f64;
    if ratio > CODE_RATIO {
        ContentKind::Code
    } else if ratio > MIXED_RATIO {
        ContentKind::Mixed
    } else {
        ContentKind::Text
    }
}

fn compress_text(content: &str, params: LevelParams) -> String {
    let paragraphs: Vec<&str> = PARAGRAPH_BREAK
        .split(content)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        return content.to_string();
    }

    let n = paragraphs.len();
    let scores: Vec<f64> = paragraphs
        .iter()
        .enumerate()
        .map(|(i, p)| paragraph_score(p, i, n))
        .collect();

    let keep = ((n as f64 * params.paragraph_ratio) as usize).max(1);
    let mut ranked: Vec<usize> = (0..n).collect();
    ranked.sort_by(|a, b| scores[*b].partial_cmp(&scores[*a]).unwrap_or(std::cmp::Ordering::Equal));
    let top: HashSet<usize> = ranked.into_iter().take(keep).collect();

    let mut out: Vec<String> = Vec::new();
    let mut skipping = false;
    for (i, paragraph) in paragraphs.iter().enumerate() {
        let heading = is_heading(paragraph);
        let list = is_list(paragraph);
        if top.contains(&i) || heading || (list && params.preserve_lists) {
            if !heading && !list && paragraph.split('.').count() > 3 {
                out.push(compress_sentences(paragraph, params.sentence_ratio));
            } else {
                out.push(paragraph.to_string());
            }
            skipping = false;
        } else if !skipping {
            out.push(SUMMARIZED_MARKER.to_string());
            skipping = true;
        }
    }
    out.join("\n\n")
}

fn paragraph_score(paragraph: &str, index: usize, count: usize) -> f64 {
    let position = if index == 0 || index + 1 == count { 1.0 } else { 0.0 };

    let words: Vec<String> = paragraph.split_whitespace().map(str::to_lowercase).collect();
    let word_count = words.len() as f64;
    let length = if word_count < 150.0 {
        (word_count / 30.0).min(1.0)
    } else {
        150.0 / word_count
    };

    let lower = paragraph.to_lowercase();
    let markers = IMPORTANCE_MARKERS.iter().filter(|m| lower.contains(*m)).count();
    let marker = (markers as f64 * 0.2).min(1.0);

    0.2 * position + 0.3 * length + 0.3 * marker + 0.2 * unique_ratio(&words)
}

fn compress_sentences(paragraph: &str, ratio: f64) -> String {
    let sentences = split_sentences(paragraph);
    let n = sentences.len();
    if n <= 2 {
        return paragraph.to_string();
    }

    let scores: Vec<f64> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let words: Vec<String> = s.split_whitespace().map(str::to_lowercase).collect();
            let wc = words.len() as f64;
            let length = if wc < 30.0 { (wc / 10.0).min(1.0) } else { 30.0 / wc };
            let position = if i == 0 || i + 1 == n { 1.0 } else { 0.0 };
            0.5 * length + 0.3 * position + 0.2 * unique_ratio(&words)
        })
        .collect();

    let keep = ((n as f64 * ratio) as usize).max(1);
    let mut ranked: Vec<usize> = (0..n).collect();
    ranked.sort_by(|a, b| scores[*b].partial_cmp(&scores[*a]).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: HashSet<usize> = ranked.into_iter().take(keep).collect();
    kept.insert(0);
    kept.insert(n - 1);

    let mut out: Vec<&str> = Vec::new();
    let mut skipping = false;
    for (i, sentence) in sentences.iter().enumerate() {
        if kept.contains(&i) {
            out.push(sentence);
            skipping = false;
        } else if !skipping {
            out.push(SKIPPED_SENTENCES);
            skipping = true;
        }
    }
    out.join(" ")
}

/// Split after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next, ws)) = chars.peek() {
                if ws.is_whitespace() {
                    let sentence = text[start..next].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = next;
                }
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn strip_code(code: &str) -> String {
    code.lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| {
            let trimmed = line.trim_start();
            if !trimmed.starts_with('#') && !trimmed.starts_with("//") {
                return true;
            }
            let lower = trimmed.to_lowercase();
            KEPT_COMMENT_MARKERS.iter().any(|m| lower.contains(m))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_heading(paragraph: &str) -> bool {
    let trimmed = paragraph.trim_start();
    trimmed.starts_with('#') || trimmed.starts_with("<h")
}

fn is_list(paragraph: &str) -> bool {
    LIST_ITEM.is_match(paragraph)
}

fn unique_ratio(words: &[String]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let unique: HashSet<&String> = words.iter().collect();
    unique.len() as f64 / words.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualmem_core::types::{ENTRY_VERSION, SourceType};

    fn entry(content: &str, category: &str) -> KnowledgeEntry {
        let now = Utc::now();
        KnowledgeEntry {
            id: "entry-1".into(),
            title: "Title".into(),
            content: content.into(),
            source_type: SourceType::Manual,
            source_reference: None,
            category: category.into(),
            subcategory: None,
            tags: Default::default(),
            metadata: Default::default(),
            code_snippets: Vec::new(),
            related_entries: Default::default(),
            quality_score: 0.5,
            created_at: now,
            updated_at: now,
            version: ENTRY_VERSION.into(),
            usage: Default::default(),
            compression: None,
            original_version: None,
        }
    }

    fn long_text() -> String {
        let mut paragraphs = vec!["# Queues in Laravel".to_string()];
        for i in 0..8 {
            paragraphs.push(format!(
                "Paragraph {i} talks about workers. Jobs are pushed onto a connection. \
                 Workers pull jobs and run them. Failed jobs are retried. \
                 Horizon gives a dashboard for queue number {i}."
            ));
        }
        paragraphs.push("In summary, the key point is to keep jobs small and idempotent.".into());
        paragraphs.join("\n\n")
    }

    fn compressor(level: CompressionLevel) -> Compressor {
        Compressor::new(&CompressionConfig {
            level,
            ..Default::default()
        })
    }

    #[test]
    fn test_detect_content_kind() {
        assert_eq!(detect_content_kind("plain words", "laravel"), ContentKind::Text);
        assert_eq!(detect_content_kind("anything", "Code Samples"), ContentKind::Code);
        assert_eq!(
            detect_content_kind("```php\n$user = User::find(1);\n$user->delete();\n```", "laravel"),
            ContentKind::Code
        );
        let mixed = "Use the find method to load a model by key.\n\n```php\nUser::find(1);\n```";
        assert_eq!(detect_content_kind(mixed, "laravel"), ContentKind::Mixed);
    }

    #[test]
    fn test_roundtrip_every_level() {
        let original = entry(&long_text(), "laravel");
        for level in [
            CompressionLevel::Minimal,
            CompressionLevel::Balanced,
            CompressionLevel::Aggressive,
        ] {
            let mut c = compressor(level);
            let compressed = c.compress(&original, None);
            assert!(compressed.is_compressed());
            assert_eq!(c.decompress(&compressed).content, original.content);
        }
    }

    #[test]
    fn test_compression_never_expands() {
        let mut c = compressor(CompressionLevel::Aggressive);
        for content in ["", "tiny", "One. Two. Three. Four. Five.", &long_text()] {
            let compressed = c.compress(&entry(content, "notes"), None);
            assert!(compressed.content.chars().count() <= content.chars().count());
        }
    }

    #[test]
    fn test_text_summary_keeps_heading_and_marks_gaps() {
        let mut c = compressor(CompressionLevel::Aggressive);
        let compressed = c.compress(&entry(&long_text(), "laravel"), None);

        assert!(compressed.content.starts_with("# Queues in Laravel"));
        assert!(compressed.content.contains(SUMMARIZED_MARKER));
        assert!(compressed.content.len() < long_text().len());
        let info = compressed.compression.unwrap();
        assert_eq!(info.kind, ContentKind::Text);
        assert_eq!(info.level, CompressionLevel::Aggressive);
        assert!(info.ratio < 1.0);
    }

    #[test]
    fn test_balanced_retries_aggressive_when_summary_too_long() {
        let mut c = compressor(CompressionLevel::Balanced);
        let compressed = c.compress(&entry(&long_text(), "laravel"), None);
        // Balanced keeps far more than half, so the retry runs
        assert_eq!(
            compressed.compression.unwrap().level,
            CompressionLevel::Aggressive
        );
    }

    #[test]
    fn test_sentence_thinning_keeps_first_and_last() {
        let paragraph = "First sentence stays here. Second one is filler. Third adds detail. \
                         Fourth repeats repeats repeats. Fifth closes.";
        let thinned = compress_sentences(paragraph, 0.5);
        assert!(thinned.starts_with("First sentence stays here."));
        assert!(thinned.ends_with("Fifth closes."));
        assert!(thinned.contains("..."));
    }

    #[test]
    fn test_short_paragraph_untouched() {
        assert_eq!(compress_sentences("One. Two.", 0.5), "One. Two.");
    }

    #[test]
    fn test_code_preserved_by_default() {
        let code = "```python\n# helper\ndef add(a, b):\n\n    return a + b\n```";
        let mut c = compressor(CompressionLevel::Balanced);
        let compressed = c.compress(&entry(code, "code"), None);
        assert_eq!(compressed.content, code);
    }

    #[test]
    fn test_code_comments_stripped_when_allowed() {
        let code = "```python\n# helper\n# TODO: validate input\ndef add(a, b):\n\n    return a + b\n```";
        let mut c = Compressor::new(&CompressionConfig {
            preserve_code: false,
            ..Default::default()
        });
        let compressed = c.compress(&entry(code, "code"), Some(ContentKind::Code));

        assert!(!compressed.content.contains("# helper"));
        assert!(compressed.content.contains("# TODO: validate input"));
        assert!(compressed.content.contains("def add(a, b):\n    return a + b"));
    }

    #[test]
    fn test_mixed_keeps_code_block() {
        let content = format!("{}\n\n```php\nUser::find(1);\n```", long_text());
        let mut c = compressor(CompressionLevel::Balanced);
        let compressed = c.compress(&entry(&content, "laravel"), Some(ContentKind::Mixed));
        assert!(compressed.content.contains("```php\nUser::find(1);\n```"));
    }

    #[test]
    fn test_recompress_keeps_first_original() {
        let original = entry(&long_text(), "laravel");
        let mut c = compressor(CompressionLevel::Minimal);
        let once = c.compress(&original, None);
        let twice = c.compress(&once, None);

        assert_eq!(twice.original_version.as_ref().unwrap().content, original.content);
        assert_eq!(c.decompress(&twice).content, original.content);
    }

    #[test]
    fn test_decompress_stamps_block() {
        let mut c = compressor(CompressionLevel::Balanced);
        let compressed = c.compress(&entry(&long_text(), "laravel"), None);
        let restored = c.decompress(&compressed);
        assert!(restored.compression.unwrap().decompressed_at.is_some());
        assert!(!c.decompress(&entry("plain", "x")).is_compressed());
    }

    #[test]
    fn test_stats_accumulate() {
        let mut c = compressor(CompressionLevel::Aggressive);
        assert_eq!(c.stats().items_compressed, 0);
        c.compress(&entry(&long_text(), "laravel"), None);

        let stats = c.stats();
        assert_eq!(stats.items_compressed, 1);
        assert_eq!(stats.chars_before, long_text().chars().count() as u64);
        assert_eq!(stats.chars_saved, stats.chars_before - stats.chars_after);
        assert!(stats.percentage > 0.0);
    }
}
