//! Bounded working memory holding the live conversation.
//!
//! Messages are kept in arrival order. Once the buffer exceeds its capacity
//! the oldest message is evicted silently. Alongside the messages the working
//! memory tracks what the session has produced so far: code blocks seen in
//! assistant replies, solution attempts, error corrections and a few
//! interaction counters. The promotion pipeline reads all of these.

use std::collections::VecDeque;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::traits::{MemoryStore, SearchableStore};
use crate::types::{Message, Role, SearchItem};

/// Default number of messages retained.
pub const DEFAULT_CAPACITY: usize = 50;

/// Messages included as context for an extracted code block.
const SNIPPET_CONTEXT_MESSAGES: usize = 3;

/// Per-message truncation applied to snippet context.
const SNIPPET_CONTEXT_CHARS: usize = 200;

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(\w+)?\n(.*?)```").unwrap());

const CLARIFICATION_KEYWORDS: &[&str] = &[
    "what do you mean",
    "clarify",
    "explain",
    "don't understand",
    "confused",
];

/// Session timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub started_at: DateTime<Utc>,
    pub last_user_message_at: Option<DateTime<Utc>>,
    pub last_assistant_message_at: Option<DateTime<Utc>>,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            last_user_message_at: None,
            last_assistant_message_at: None,
        }
    }
}

/// A problem/solution pair reported by the surrounding agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionAttempt {
    pub problem: String,
    pub solution: String,
    pub successful: bool,
    pub timestamp: DateTime<Utc>,
}

/// An error and the correction that resolved it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCorrection {
    pub error: String,
    pub correction: String,
    pub timestamp: DateTime<Utc>,
}

/// A fenced code block seen in an assistant reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedSnippet {
    pub code: String,
    pub language: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// Interaction quality counters for the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionMetrics {
    pub successful_solutions: u32,
    pub failed_attempts: u32,
    pub clarification_requests: u32,
    pub corrections_applied: u32,
}

/// Serializable image of a working memory, written as `session_<id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub session_metadata: SessionMetadata,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub solution_attempts: Vec<SolutionAttempt>,
    #[serde(default)]
    pub code_snippets: Vec<ObservedSnippet>,
    #[serde(default)]
    pub error_corrections: Vec<ErrorCorrection>,
    #[serde(default)]
    pub interaction_metrics: InteractionMetrics,
    pub timestamp: DateTime<Utc>,
}

/// Bounded FIFO of conversation messages plus session records.
#[derive(Debug, Clone)]
pub struct WorkingMemory {
    messages: VecDeque<Message>,
    capacity: usize,
    session_id: String,
    metadata: SessionMetadata,
    solution_attempts: Vec<SolutionAttempt>,
    code_snippets: Vec<ObservedSnippet>,
    error_corrections: Vec<ErrorCorrection>,
    metrics: InteractionMetrics,
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl WorkingMemory {
    /// Create an empty working memory with a fresh session id.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity + 1),
            capacity,
            session_id: Uuid::new_v4().to_string(),
            metadata: SessionMetadata::default(),
            solution_attempts: Vec::new(),
            code_snippets: Vec::new(),
            error_corrections: Vec::new(),
            metrics: InteractionMetrics::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// Append a message, returning the evicted message if the buffer overflowed.
    pub fn append(&mut self, message: Message) -> Option<Message> {
        match message.role {
            Role::User => {
                self.metadata.last_user_message_at = Some(message.timestamp);
                if is_clarification_request(&message.content) {
                    self.metrics.clarification_requests += 1;
                }
            }
            Role::Assistant => {
                self.metadata.last_assistant_message_at = Some(message.timestamp);
            }
            Role::System => {}
        }

        let is_assistant = message.role == Role::Assistant;
        self.messages.push_back(message);

        let evicted = if self.messages.len() > self.capacity {
            self.messages.pop_front()
        } else {
            None
        };

        if is_assistant {
            self.extract_code_snippets();
        }

        evicted
    }

    /// All messages in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn by_id(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Case-insensitive substring search.
    ///
    /// Relevance is `0.5 + 0.25 * (1 - position / len) + 0.25 * (query_len / len)`,
    /// measured in characters. Results are best first, ties keep arrival order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(&Message, f64)> {
        let query = query.to_lowercase();
        if query.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }
        let query_len = query.chars().count() as f64;

        let mut results: Vec<(&Message, f64)> = self
            .messages
            .iter()
            .filter_map(|message| {
                let content = message.content.to_lowercase();
                let byte_pos = content.find(&query)?;
                let position = content[..byte_pos].chars().count() as f64;
                let len = content.chars().count().max(1) as f64;
                let relevance = 0.5 + 0.25 * (1.0 - position / len) + 0.25 * (query_len / len);
                Some((message, relevance))
            })
            .collect();

        // sort_by is stable, so equal scores keep arrival order
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }

    pub fn user_messages(&self) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.role == Role::User).collect()
    }

    pub fn assistant_messages(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect()
    }

    /// The most recent `n` messages, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<&Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).collect()
    }

    pub fn record_solution_attempt(
        &mut self,
        problem: impl Into<String>,
        solution: impl Into<String>,
        successful: bool,
    ) -> &SolutionAttempt {
        if successful {
            self.metrics.successful_solutions += 1;
        } else {
            self.metrics.failed_attempts += 1;
        }
        self.solution_attempts.push(SolutionAttempt {
            problem: problem.into(),
            solution: solution.into(),
            successful,
            timestamp: Utc::now(),
        });
        &self.solution_attempts[self.solution_attempts.len() - 1]
    }

    pub fn record_error_correction(
        &mut self,
        error: impl Into<String>,
        correction: impl Into<String>,
    ) {
        self.metrics.corrections_applied += 1;
        self.error_corrections.push(ErrorCorrection {
            error: error.into(),
            correction: correction.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn solution_attempts(&self) -> &[SolutionAttempt] {
        &self.solution_attempts
    }

    pub fn code_snippets(&self) -> &[ObservedSnippet] {
        &self.code_snippets
    }

    pub fn error_corrections(&self) -> &[ErrorCorrection] {
        &self.error_corrections
    }

    pub fn interaction_metrics(&self) -> InteractionMetrics {
        self.metrics
    }

    /// Serializable image of the current session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            session_metadata: self.metadata.clone(),
            messages: self.messages.iter().cloned().collect(),
            solution_attempts: self.solution_attempts.clone(),
            code_snippets: self.code_snippets.clone(),
            error_corrections: self.error_corrections.clone(),
            interaction_metrics: self.metrics,
            timestamp: Utc::now(),
        }
    }

    /// Rebuild a working memory from a snapshot.
    ///
    /// Only the newest `capacity` messages survive if the snapshot holds more.
    pub fn restore(snapshot: SessionSnapshot, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut messages: VecDeque<Message> = snapshot.messages.into();
        while messages.len() > capacity {
            messages.pop_front();
        }

        Self {
            messages,
            capacity,
            session_id: snapshot.session_id,
            metadata: snapshot.session_metadata,
            solution_attempts: snapshot.solution_attempts,
            code_snippets: snapshot.code_snippets,
            error_corrections: snapshot.error_corrections,
            metrics: snapshot.interaction_metrics,
        }
    }

    fn extract_code_snippets(&mut self) {
        let Some(latest) = self.messages.back() else {
            return;
        };

        let blocks: Vec<(Option<String>, String)> = CODE_BLOCK
            .captures_iter(&latest.content)
            .map(|caps| {
                let tag = caps.get(1).map(|m| m.as_str().to_string());
                let code = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                (tag, code.to_string())
            })
            .collect();
        if blocks.is_empty() {
            return;
        }

        let context = self.recent_context();
        let now = Utc::now();
        for (tag, code) in blocks {
            let language = match detect_language(&code) {
                "unknown" => tag.unwrap_or_else(|| "unknown".to_string()),
                detected => detected.to_string(),
            };
            self.code_snippets.push(ObservedSnippet {
                code,
                language,
                context: context.clone(),
                timestamp: now,
            });
        }
    }

    fn recent_context(&self) -> String {
        self.last_n(SNIPPET_CONTEXT_MESSAGES)
            .into_iter()
            .map(|m| format!("{}: {}", m.role, truncate_chars(&m.content, SNIPPET_CONTEXT_CHARS)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl MemoryStore for WorkingMemory {
    type Record = Message;

    fn get(&self, id: &str) -> Option<&Message> {
        self.by_id(id)
    }

    fn len(&self) -> usize {
        self.messages.len()
    }

    /// Empties the buffer and every session record; the session id is kept.
    fn clear(&mut self) {
        self.messages.clear();
        self.solution_attempts.clear();
        self.code_snippets.clear();
        self.error_corrections.clear();
        self.metrics = InteractionMetrics::default();
    }
}

impl SearchableStore for WorkingMemory {
    fn search_items(&self) -> Vec<SearchItem> {
        self.messages.iter().map(SearchItem::from).collect()
    }
}

/// Heuristic language detection for extracted code blocks.
pub fn detect_language(code: &str) -> &'static str {
    if code.contains("<?php") || code.contains("namespace App") {
        "php"
    } else if code.contains("<template") && code.contains("<script") {
        "vue"
    } else if code.contains("function") && code.contains("return") && code.contains("const") {
        "javascript"
    } else if code.contains("import React") || code.contains("export default") {
        "javascript-react"
    } else if code.contains("<x-") || code.contains("@section") || code.contains("@extends") {
        "blade"
    } else {
        "unknown"
    }
}

fn is_clarification_request(content: &str) -> bool {
    if !content.contains('?') {
        return false;
    }
    let lower = content.to_lowercase();
    CLARIFICATION_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Truncate to `max` characters, appending `...` when anything was cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with(contents: &[&str]) -> WorkingMemory {
        let mut memory = WorkingMemory::default();
        for content in contents {
            memory.append(Message::user(*content));
        }
        memory
    }

    #[test]
    fn test_capacity_eviction() {
        let mut memory = WorkingMemory::new(50);
        let mut first_id = None;
        for i in 0..51 {
            let message = Message::user(format!("message {i}"));
            if i == 0 {
                first_id = Some(message.id.clone());
            }
            memory.append(message);
        }

        assert_eq!(memory.len(), 50);
        let first_id = first_id.unwrap();
        assert!(memory.by_id(&first_id).is_none());
        assert!(memory.all().all(|m| m.id != first_id));
        assert_eq!(memory.all().next().unwrap().content, "message 1");
    }

    #[test]
    fn test_append_returns_evicted() {
        let mut memory = WorkingMemory::new(1);
        assert!(memory.append(Message::user("a")).is_none());
        let evicted = memory.append(Message::user("b")).unwrap();
        assert_eq!(evicted.content, "a");
    }

    #[test]
    fn test_search_relevance_formula() {
        let memory = memory_with(&["Eloquent relationships", "Using eloquent"]);
        let results = memory.search("ELOQUENT", 10);
        assert_eq!(results.len(), 2);

        // match at 0 of 22 chars: 0.5 + 0.25 + 0.25 * 8/22
        let expected_first = 0.5 + 0.25 + 0.25 * (8.0 / 22.0);
        assert_eq!(results[0].0.content, "Eloquent relationships");
        assert!((results[0].1 - expected_first).abs() < 1e-9);

        // match at 6 of 14 chars
        let expected_second = 0.5 + 0.25 * (1.0 - 6.0 / 14.0) + 0.25 * (8.0 / 14.0);
        assert!((results[1].1 - expected_second).abs() < 1e-9);
    }

    #[test]
    fn test_search_ties_keep_arrival_order() {
        let memory = memory_with(&["abc one", "abc two", "zzz"]);
        let results = memory.search("abc", 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.content, "abc one");
        assert_eq!(results[1].0.content, "abc two");
    }

    #[test]
    fn test_search_top_k_and_blank_query() {
        let memory = memory_with(&["route cache", "route list", "route clear"]);
        assert_eq!(memory.search("route", 2).len(), 2);
        assert!(memory.search("   ", 5).is_empty());
        assert!(memory.search("missing", 5).is_empty());
    }

    #[test]
    fn test_code_snippet_extraction() {
        let mut memory = WorkingMemory::default();
        memory.append(Message::user("How do I define a model?"));
        memory.append(Message::assistant(
            "Like this:\n```php\n<?php\nnamespace App\\Models;\nclass Post extends Model {}\n```\nand\n```sql\nSELECT 1;\n```",
        ));

        let snippets = memory.code_snippets();
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].language, "php");
        assert_eq!(snippets[1].language, "sql");
        assert!(snippets[0].context.contains("user: How do I define a model?"));
    }

    #[test]
    fn test_user_code_blocks_are_not_extracted() {
        let mut memory = WorkingMemory::default();
        memory.append(Message::user("```js\nconst x = 1;\n```"));
        assert!(memory.code_snippets().is_empty());
    }

    #[test]
    fn test_clarification_tracking() {
        let mut memory = WorkingMemory::default();
        memory.append(Message::user("Could you clarify what a facade is?"));
        memory.append(Message::user("Please clarify."));
        assert_eq!(memory.interaction_metrics().clarification_requests, 1);
    }

    #[test]
    fn test_records_and_clear() {
        let mut memory = memory_with(&["hello"]);
        memory.record_solution_attempt("N+1 queries", "use with()", true);
        memory.record_solution_attempt("slow tests", "parallel", false);
        memory.record_error_correction("Class not found", "run composer dump-autoload");

        let metrics = memory.interaction_metrics();
        assert_eq!(metrics.successful_solutions, 1);
        assert_eq!(metrics.failed_attempts, 1);
        assert_eq!(metrics.corrections_applied, 1);

        let session = memory.session_id().to_string();
        memory.clear();
        assert!(memory.is_empty());
        assert!(memory.solution_attempts().is_empty());
        assert!(memory.error_corrections().is_empty());
        assert_eq!(memory.interaction_metrics(), InteractionMetrics::default());
        assert_eq!(memory.session_id(), session);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut memory = memory_with(&["one", "two", "three"]);
        memory.record_error_correction("typo", "fixed");
        let snapshot = memory.snapshot();

        let restored = WorkingMemory::restore(snapshot.clone(), 2);
        assert_eq!(restored.session_id(), memory.session_id());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.all().next().unwrap().content, "two");
        assert_eq!(restored.error_corrections().len(), 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.messages, snapshot.messages);
    }

    #[test]
    fn test_last_n_and_role_views() {
        let mut memory = WorkingMemory::default();
        memory.append(Message::user("q1"));
        memory.append(Message::assistant("a1"));
        memory.append(Message::user("q2"));

        let last: Vec<_> = memory.last_n(2).iter().map(|m| m.content.as_str()).collect();
        assert_eq!(last, vec!["a1", "q2"]);
        assert_eq!(memory.last_n(10).len(), 3);
        assert_eq!(memory.user_messages().len(), 2);
        assert_eq!(memory.assistant_messages().len(), 1);
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("<template><div/></template><script></script>"), "vue");
        assert_eq!(detect_language("const f = function() { return 1 }"), "javascript");
        assert_eq!(detect_language("@extends('layouts.app')"), "blade");
        assert_eq!(detect_language("fn main() {}"), "unknown");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel...");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }
}
