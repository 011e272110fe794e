//! Shared types for dualmem-core.
//!
//! These types are used by both stores, the persistence layer and the SDK.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version stamped on every knowledge entry.
pub const ENTRY_VERSION: &str = "1.0";

/// Free-form entry metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Conversation Types
// ─────────────────────────────────────────────────────────────────────────────

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" | "human" => Some(Self::User),
            "assistant" | "ai" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single conversation turn. Immutable once appended to working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge Types
// ─────────────────────────────────────────────────────────────────────────────

/// How a knowledge entry was acquired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Conversation,
    ErrorCorrection,
    ConversationConcept,
    #[default]
    Manual,
    Documentation,
    #[serde(other)]
    Other,
}

impl SourceType {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(Self::Conversation),
            "error_correction" => Some(Self::ErrorCorrection),
            "conversation_concept" => Some(Self::ConversationConcept),
            "manual" => Some(Self::Manual),
            "documentation" => Some(Self::Documentation),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::ErrorCorrection => "error_correction",
            Self::ConversationConcept => "conversation_concept",
            Self::Manual => "manual",
            Self::Documentation => "documentation",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A code fragment attached to a knowledge entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub context: String,
}

/// Retrieval counters feeding the usage and success relevance factors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub usage_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
}

/// Content classification used by the compressor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Code,
    Mixed,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compression aggressiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    Minimal,
    #[default]
    Balanced,
    Aggressive,
}

impl CompressionLevel {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "minimal" => Some(Self::Minimal),
            "balanced" => Some(Self::Balanced),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        }
    }
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compression block attached to a compressed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionInfo {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub level: CompressionLevel,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decompressed_at: Option<DateTime<Utc>>,
}

/// Verbatim snapshot that makes compression reversible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalVersion {
    pub content: String,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
}

/// Curated fact held by the knowledge store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source_type: SourceType,
    pub source_reference: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub code_snippets: Vec<CodeSnippet>,
    #[serde(default)]
    pub related_entries: BTreeSet<String>,
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub usage: UsageStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_version: Option<OriginalVersion>,
}

impl KnowledgeEntry {
    /// Whether the content currently holds a summary rather than the original
    pub fn is_compressed(&self) -> bool {
        self.original_version.is_some()
            && self
                .compression
                .as_ref()
                .is_some_and(|c| c.decompressed_at.is_none())
    }

    /// Item complexity recorded in metadata, if any
    pub fn complexity(&self) -> Option<f64> {
        self.metadata.get("complexity").and_then(|v| v.as_f64())
    }
}

/// Input for creating a knowledge entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub source_reference: Option<String>,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub code_snippets: Vec<CodeSnippet>,
    #[serde(default)]
    pub related_entries: BTreeSet<String>,
    /// Defaults to 0.5 when absent
    #[serde(default)]
    pub quality_score: Option<f64>,
}

impl NewEntry {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source_type: SourceType, reference: Option<String>) -> Self {
        self.source_type = source_type;
        self.source_reference = reference;
        self
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_snippet(mut self, snippet: CodeSnippet) -> Self {
        self.code_snippets.push(snippet);
        self
    }
}

/// Typed field update for a knowledge entry.
///
/// `None` leaves a field untouched. The nested options on `subcategory`,
/// `source_reference`, `compression` and `original_version` distinguish
/// "leave alone" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub source_reference: Option<Option<String>>,
    pub category: Option<String>,
    pub subcategory: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
    pub metadata: Option<Metadata>,
    pub code_snippets: Option<Vec<CodeSnippet>>,
    pub quality_score: Option<f64>,
    pub compression: Option<Option<CompressionInfo>>,
    pub original_version: Option<Option<OriginalVersion>>,
}

impl EntryPatch {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn subcategory(mut self, subcategory: Option<String>) -> Self {
        self.subcategory = Some(subcategory);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn quality_score(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    /// True when applying this patch requires tag index or category map repair
    pub fn touches_indices(&self) -> bool {
        self.tags.is_some() || self.category.is_some() || self.subcategory.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search Types
// ─────────────────────────────────────────────────────────────────────────────

/// Which memory an item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    Working,
    Knowledge,
}

impl ItemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Knowledge => "knowledge",
        }
    }
}

impl std::fmt::Display for ItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-item inputs to relevance scoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringSignals {
    pub timestamp: Option<DateTime<Utc>>,
    pub usage_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub complexity: Option<f64>,
}

/// Uniform projection of a message or knowledge entry for hybrid search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: String,
    pub source: ItemSource,
    pub title: Option<String>,
    pub content: String,
    pub signals: ScoringSignals,
}

impl From<&Message> for SearchItem {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            source: ItemSource::Working,
            title: None,
            content: message.content.clone(),
            signals: ScoringSignals {
                timestamp: Some(message.timestamp),
                ..Default::default()
            },
        }
    }
}

impl From<&KnowledgeEntry> for SearchItem {
    fn from(entry: &KnowledgeEntry) -> Self {
        Self {
            id: entry.id.clone(),
            source: ItemSource::Knowledge,
            title: Some(entry.title.clone()),
            content: entry.content.clone(),
            signals: ScoringSignals {
                timestamp: Some(entry.updated_at),
                usage_count: entry.usage.usage_count,
                success_count: entry.usage.success_count,
                failure_count: entry.usage.failure_count,
                complexity: entry.complexity(),
            },
        }
    }
}
