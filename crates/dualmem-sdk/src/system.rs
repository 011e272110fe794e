//! Dual memory orchestrator
//!
//! Ties the working memory, the knowledge store and the processing modules
//! together behind one async interface.
//!
//! Each store sits behind its own lock. Mutations of either store drop the
//! search cache rather than trying to invalidate individual queries.
//!
//! On disk a memory directory looks like:
//!
//! ```text
//! <base>/
//! ├── dual_memory_metadata.json
//! ├── permanent/
//! │   ├── entries.json
//! │   ├── categories.json
//! │   └── tag_index.json
//! └── temporary/
//!     └── session_<id>.json
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};

use dualmem_core::memory::{
    KnowledgeStore, MemoryStore, SearchableStore, SessionSnapshot, WorkingMemory,
};
use dualmem_core::persist::{read_json, write_json_atomic};
use dualmem_core::types::{EntryPatch, KnowledgeEntry, Message, NewEntry, Role, SearchItem};

use crate::memory::{
    Candidate, CompressionStats, Compressor, ConfidenceLevel, NoopSink, OperationEvent,
    OperationSink, OperationType, PipelineState, PromotionPipeline, PromotionReport,
    QualityJudge, QueryType, RelevanceScorer, ScoreRequest, SearchCache, SearchStats,
    SemanticSearch, judge_candidates,
};
use crate::utils::elapsed_ms;
use crate::{SDKConfig, SDKResult};

pub const PERMANENT_DIR: &str = "permanent";
pub const TEMPORARY_DIR: &str = "temporary";
pub const METADATA_FILE: &str = "dual_memory_metadata.json";

/// Contents of `dual_memory_metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub timestamp: DateTime<Utc>,
    pub message_counter: u32,
    pub auto_analyze_frequency: u32,
    pub current_session_id: String,
}

/// A ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub item: SearchItem,
    /// Hybrid search relevance before scoring
    pub search_relevance: f64,
    /// Final relevance score in [0,1]
    pub score: f64,
    pub confidence: ConfidenceLevel,
    pub query_type: QueryType,
}

/// Something found by id in either memory
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    Message(Message),
    Entry(KnowledgeEntry),
}

impl Retrieved {
    pub fn content(&self) -> &str {
        match self {
            Self::Message(m) => &m.content,
            Self::Entry(e) => &e.content,
        }
    }
}

/// Result of compressing every eligible entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub total_entries: usize,
    pub compressed_entries: usize,
    pub original_chars: usize,
    pub compressed_chars: usize,
    pub chars_saved: usize,
    pub ratio: f64,
}

/// Snapshot of system counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub session_id: String,
    pub working_messages: usize,
    pub working_capacity: usize,
    pub knowledge_entries: usize,
    pub categories: usize,
    pub tags: usize,
    pub message_counter: u32,
    pub auto_compress: bool,
    pub pipeline_state: PipelineState,
    pub search: SearchStats,
    pub compression: CompressionStats,
}

/// The dual memory system
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dualmem_sdk::{MemorySystem, SDKConfig, TracingSink};
/// use dualmem_core::types::Role;
///
/// async fn example() -> dualmem_sdk::SDKResult<()> {
///     let memory = MemorySystem::new(SDKConfig::default())?
///         .with_sink(Arc::new(TracingSink));
///
///     memory.add_message(Role::User, "Why is my queue worker stuck?").await;
///     for hit in memory.search("queue worker", 5).await {
///         println!("{:.2} {}", hit.score, hit.item.content);
///     }
///     Ok(())
/// }
/// ```
pub struct MemorySystem {
    config: SDKConfig,
    working: RwLock<WorkingMemory>,
    knowledge: RwLock<KnowledgeStore>,
    scorer: RwLock<RelevanceScorer>,
    cache: Mutex<SearchCache>,
    compressor: Mutex<Compressor>,
    pipeline: Mutex<PromotionPipeline>,
    message_counter: AtomicU32,
    auto_compress: AtomicBool,
    judge: Option<Arc<dyn QualityJudge>>,
    semantic: Option<Arc<dyn SemanticSearch>>,
    sink: Arc<dyn OperationSink>,
}

impl MemorySystem {
    /// Create an empty system
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails
    pub fn new(config: SDKConfig) -> SDKResult<Self> {
        config.validate()?;
        let working = WorkingMemory::new(config.working.capacity);
        Ok(Self::with_state(config, working, KnowledgeStore::new(), 0))
    }

    fn with_state(
        config: SDKConfig,
        working: WorkingMemory,
        knowledge: KnowledgeStore,
        message_counter: u32,
    ) -> Self {
        Self {
            working: RwLock::new(working),
            knowledge: RwLock::new(knowledge),
            scorer: RwLock::new(RelevanceScorer::new(config.scoring)),
            cache: Mutex::new(SearchCache::new(&config.search)),
            compressor: Mutex::new(Compressor::new(&config.compression)),
            pipeline: Mutex::new(PromotionPipeline::new(config.promotion.clone())),
            message_counter: AtomicU32::new(message_counter),
            auto_compress: AtomicBool::new(config.compression.auto_compress),
            judge: None,
            semantic: None,
            sink: Arc::new(NoopSink),
            config,
        }
    }

    /// Set the quality judge used for promotion
    pub fn with_judge(mut self, judge: Arc<dyn QualityJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Set the telemetry sink
    pub fn with_sink(mut self, sink: Arc<dyn OperationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set the semantic similarity source used by search
    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticSearch>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn config(&self) -> &SDKConfig {
        &self.config
    }

    /// Read access to the working memory
    pub async fn working(&self) -> RwLockReadGuard<'_, WorkingMemory> {
        self.working.read().await
    }

    /// Read access to the knowledge store
    pub async fn knowledge_snapshot(&self) -> RwLockReadGuard<'_, KnowledgeStore> {
        self.knowledge.read().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Conversation
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a message and run a promotion pass every
    /// `auto_analyze_frequency` messages. Returns the message id.
    pub async fn add_message(&self, role: Role, content: impl Into<String>) -> String {
        let message = Message::new(role, content);
        let id = message.id.clone();
        self.working.write().await.append(message);
        self.invalidate_search().await;

        let frequency = self.config.promotion.auto_analyze_frequency;
        let previous = self
            .message_counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(if count + 1 >= frequency { 0 } else { count + 1 })
            })
            .unwrap_or_else(|count| count);
        if previous + 1 >= frequency {
            tracing::debug!(messages = previous + 1, "Auto-analysis threshold reached");
            self.promote_now().await;
        }
        id
    }

    /// Record a solution attempt. A successful one is judged immediately.
    pub async fn record_solution_attempt(
        &self,
        problem: &str,
        solution: &str,
        successful: bool,
    ) -> Option<PromotionReport> {
        let session_id = {
            let mut working = self.working.write().await;
            working.record_solution_attempt(problem, solution, successful);
            working.session_id().to_string()
        };

        if !successful {
            return None;
        }
        let candidate = Candidate::solution(&session_id, problem, solution);
        Some(self.run_promotion(vec![candidate]).await)
    }

    pub async fn record_error_correction(&self, error: &str, correction: &str) {
        self.working
            .write()
            .await
            .record_error_correction(error, correction);
    }

    /// Empty the working memory and reset the auto-analysis counter
    pub async fn clear_working(&self) {
        self.working.write().await.clear();
        self.message_counter.store(0, Ordering::SeqCst);
        self.invalidate_search().await;
        tracing::info!("Working memory cleared");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Promotion
    // ─────────────────────────────────────────────────────────────────────────

    /// Judge everything the working memory currently offers
    pub async fn promote_now(&self) -> PromotionReport {
        let snapshot = self.working.read().await.clone();
        let candidates = self.pipeline.lock().await.collect_candidates(&snapshot);
        self.run_promotion(candidates).await
    }

    async fn run_promotion(&self, candidates: Vec<Candidate>) -> PromotionReport {
        let start = Instant::now();
        let total = candidates.len();

        let Some(judge) = self.judge.clone() else {
            if total > 0 {
                tracing::warn!(candidates = total, "No quality judge configured, discarding candidates");
            }
            return PromotionReport {
                candidates: total,
                judge_failures: total,
                ..Default::default()
            };
        };

        // Neither the pipeline nor a store is held while the judge runs
        let (fresh, duplicates, timeout) = {
            let mut pipeline = self.pipeline.lock().await;
            let knowledge = self.knowledge.read().await;
            let (fresh, duplicates) = pipeline.filter_known(candidates, &knowledge);
            (fresh, duplicates, pipeline.begin_analysis())
        };
        let evaluation = judge_candidates(fresh, judge.as_ref(), timeout).await;
        let mut report = {
            let mut pipeline = self.pipeline.lock().await;
            let mut knowledge = self.knowledge.write().await;
            pipeline.promote(evaluation, &mut knowledge)
        };

        report.candidates = total;
        report.duplicates += duplicates;
        if !report.promoted.is_empty() {
            self.invalidate_search().await;
        }

        tracing::info!(
            candidates = report.candidates,
            promoted = report.promoted.len(),
            discarded = report.discarded,
            duplicates = report.duplicates,
            judge_failures = report.judge_failures,
            "Promotion pass complete"
        );
        self.emit(
            OperationEvent::new(OperationType::Promotion, elapsed_ms(start))
                .with_params(json!({ "candidates": total }))
                .with_summary(json!({
                    "promoted": report.promoted.len(),
                    "discarded": report.discarded,
                    "duplicates": report.duplicates,
                    "judge_failures": report.judge_failures,
                })),
        );
        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Search & retrieval
    // ─────────────────────────────────────────────────────────────────────────

    /// Search both memories, best first
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let start = Instant::now();

        let mut items = self.working.read().await.search_items();
        items.extend(self.knowledge.read().await.search_items());

        let candidates = top_k.saturating_mul(self.config.search.candidate_multiplier);
        let scored = self
            .cache
            .lock()
            .await
            .search(query, &items, self.semantic.as_deref(), candidates);

        let mut hits: Vec<SearchHit> = {
            let scorer = self.scorer.read().await;
            scored
                .into_iter()
                .map(|scored| {
                    let request = ScoreRequest::new(query)
                        .with_similarity(scored.relevance.clamp(0.0, 1.0));
                    let breakdown =
                        scorer.score_at(&scored.item.signals, &request, scored.ranked_at);
                    SearchHit {
                        item: scored.item,
                        search_relevance: scored.relevance,
                        score: breakdown.final_score,
                        confidence: breakdown.confidence,
                        query_type: breakdown.query_type,
                    }
                })
                .collect()
        };
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);

        self.emit(
            OperationEvent::new(OperationType::Search, elapsed_ms(start))
                .with_query(query)
                .with_params(json!({ "top_k": top_k, "items": items.len() }))
                .with_summary(json!({ "results": hits.len() })),
        );
        hits
    }

    /// Find an item by id, working memory first.
    ///
    /// Knowledge hits count as a use. With `decompress` a compressed entry
    /// comes back with its original content.
    pub async fn retrieve(&self, id: &str, decompress: bool) -> Option<Retrieved> {
        let start = Instant::now();

        let found = if let Some(message) = self.working.read().await.by_id(id).cloned() {
            Some(Retrieved::Message(message))
        } else {
            let entry = {
                let mut knowledge = self.knowledge.write().await;
                knowledge.touch(id);
                knowledge.get(id).cloned()
            };
            if entry.is_some() {
                self.invalidate_search().await;
            }
            match entry {
                Some(entry) if decompress && entry.is_compressed() => Some(Retrieved::Entry(
                    self.compressor.lock().await.decompress(&entry),
                )),
                Some(entry) => Some(Retrieved::Entry(entry)),
                None => None,
            }
        };

        self.emit(
            OperationEvent::new(OperationType::Retrieval, elapsed_ms(start))
                .with_params(json!({ "id": id, "decompress": decompress }))
                .with_summary(json!({ "found": found.is_some() })),
        );
        found
    }

    /// Retrieve with decompression
    pub async fn get_entry(&self, id: &str) -> Option<Retrieved> {
        self.retrieve(id, true).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Knowledge
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert entries, compressing long ones when auto-compression is on
    pub async fn store_knowledge(&self, entries: Vec<NewEntry>) -> Vec<String> {
        let start = Instant::now();
        let auto_compress = self.auto_compress.load(Ordering::SeqCst);
        let threshold = self.config.compression.threshold_chars;

        let mut ids = Vec::with_capacity(entries.len());
        let mut compressed = 0usize;
        {
            let mut knowledge = self.knowledge.write().await;
            for entry in entries {
                let long = entry.content.chars().count() > threshold;
                let id = knowledge.add(entry);
                if auto_compress && long && self.compress_in_place(&mut knowledge, &id).await {
                    compressed += 1;
                }
                ids.push(id);
            }
        }
        self.invalidate_search().await;

        tracing::info!(stored = ids.len(), compressed, "Stored knowledge entries");
        self.emit(
            OperationEvent::new(OperationType::Store, elapsed_ms(start))
                .with_params(json!({ "entries": ids.len() }))
                .with_summary(json!({ "ids": ids, "compressed": compressed })),
        );
        ids
    }

    /// Apply a patch. An empty patch only reports whether the id exists.
    pub async fn update_entry(&self, id: &str, patch: EntryPatch) -> bool {
        if patch.is_empty() {
            return self.knowledge.read().await.get(id).is_some();
        }
        let updated = self.knowledge.write().await.update(id, patch);
        if updated {
            self.invalidate_search().await;
        }
        updated
    }

    pub async fn delete_entry(&self, id: &str) -> bool {
        let deleted = self.knowledge.write().await.delete(id);
        if deleted {
            self.invalidate_search().await;
        }
        deleted
    }

    pub async fn add_relationship(&self, a: &str, b: &str) -> bool {
        self.knowledge.write().await.add_relationship(a, b)
    }

    pub async fn remove_relationship(&self, a: &str, b: &str) -> bool {
        self.knowledge.write().await.remove_relationship(a, b)
    }

    /// Record whether applying an entry worked
    pub async fn record_outcome(&self, id: &str, success: bool) -> bool {
        let recorded = self.knowledge.write().await.record_outcome(id, success);
        if recorded {
            self.invalidate_search().await;
        }
        recorded
    }

    /// Record a helpful/unhelpful vote for a search result
    pub async fn record_feedback(&self, item_id: &str, helpful: bool, query: &str) {
        self.scorer
            .write()
            .await
            .record_feedback(item_id, helpful, query);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Compression
    // ─────────────────────────────────────────────────────────────────────────

    /// Compress every uncompressed entry above the threshold
    pub async fn optimize_all(&self) -> OptimizationReport {
        let start = Instant::now();
        let threshold = self.config.compression.threshold_chars;

        let mut knowledge = self.knowledge.write().await;
        let eligible: Vec<String> = knowledge
            .all()
            .filter(|e| !e.is_compressed() && e.content.chars().count() > threshold)
            .map(|e| e.id.clone())
            .collect();

        let mut report = OptimizationReport {
            total_entries: knowledge.len(),
            ..Default::default()
        };
        for id in &eligible {
            let before = knowledge.get(id).map(|e| e.content.chars().count()).unwrap_or(0);
            if self.compress_in_place(&mut knowledge, id).await {
                let after = knowledge.get(id).map(|e| e.content.chars().count()).unwrap_or(0);
                report.compressed_entries += 1;
                report.original_chars += before;
                report.compressed_chars += after;
            }
        }
        drop(knowledge);

        report.chars_saved = report.original_chars.saturating_sub(report.compressed_chars);
        report.ratio = if report.original_chars > 0 {
            report.compressed_chars as f64 / report.original_chars as f64
        } else {
            1.0
        };
        if report.compressed_entries > 0 {
            self.invalidate_search().await;
        }

        tracing::info!(
            compressed = report.compressed_entries,
            saved = report.chars_saved,
            "Optimization complete"
        );
        self.emit(
            OperationEvent::new(OperationType::Optimization, elapsed_ms(start))
                .with_summary(serde_json::to_value(&report).unwrap_or_default()),
        );
        report
    }

    async fn compress_in_place(&self, knowledge: &mut KnowledgeStore, id: &str) -> bool {
        let Some(entry) = knowledge.get(id) else {
            return false;
        };
        let start = Instant::now();
        let compressed = self.compressor.lock().await.compress(entry, None);
        let info = compressed.compression.clone();

        let patch = EntryPatch {
            content: Some(compressed.content),
            compression: Some(compressed.compression),
            original_version: Some(compressed.original_version),
            ..Default::default()
        };
        let updated = knowledge.update(id, patch);

        if let Some(info) = info {
            self.emit(
                OperationEvent::new(OperationType::Compression, elapsed_ms(start))
                    .with_params(json!({ "id": id, "level": info.level.as_str() }))
                    .with_summary(json!({
                        "original_size": info.original_size,
                        "compressed_size": info.compressed_size,
                        "ratio": info.ratio,
                    })),
            );
        }
        updated
    }

    /// Toggle compression on store
    pub fn set_auto_compression(&self, enabled: bool) {
        self.auto_compress.store(enabled, Ordering::SeqCst);
    }

    pub async fn clear_search_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn invalidate_search(&self) {
        self.cache.lock().await.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stats & persistence
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn stats(&self) -> SystemStats {
        let (session_id, working_messages, working_capacity) = {
            let working = self.working.read().await;
            (
                working.session_id().to_string(),
                working.len(),
                working.capacity(),
            )
        };
        let (knowledge_entries, categories, tags) = {
            let knowledge = self.knowledge.read().await;
            (
                knowledge.len(),
                knowledge.categories().len(),
                knowledge.tag_index().len(),
            )
        };

        SystemStats {
            session_id,
            working_messages,
            working_capacity,
            knowledge_entries,
            categories,
            tags,
            message_counter: self.message_counter.load(Ordering::SeqCst),
            auto_compress: self.auto_compress.load(Ordering::SeqCst),
            pipeline_state: self.pipeline.lock().await.state(),
            search: self.cache.lock().await.stats(),
            compression: self.compressor.lock().await.stats(),
        }
    }

    /// Write both memories and the metadata file under `base`
    pub async fn save(&self, base: &Path) -> SDKResult<()> {
        self.knowledge
            .read()
            .await
            .save(&base.join(PERMANENT_DIR))?;

        let snapshot = self.working.read().await.snapshot();
        let session_path = base
            .join(TEMPORARY_DIR)
            .join(format!("session_{}.json", snapshot.session_id));
        write_json_atomic(&session_path, &snapshot)?;

        let metadata = SystemMetadata {
            timestamp: Utc::now(),
            message_counter: self.message_counter.load(Ordering::SeqCst),
            auto_analyze_frequency: self.config.promotion.auto_analyze_frequency,
            current_session_id: snapshot.session_id.clone(),
        };
        write_json_atomic(&base.join(METADATA_FILE), &metadata)?;

        tracing::info!(
            path = %base.display(),
            session_id = %snapshot.session_id,
            messages = snapshot.messages.len(),
            "Memory system saved"
        );
        Ok(())
    }

    /// Load a system from `base`.
    ///
    /// Missing or corrupt pieces are replaced by fresh state with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error only if configuration validation fails
    pub async fn load(base: &Path, config: SDKConfig) -> SDKResult<Self> {
        config.validate()?;

        let knowledge = KnowledgeStore::load_or_default(&base.join(PERMANENT_DIR));

        let metadata = match read_json::<SystemMetadata>(&base.join(METADATA_FILE)) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read memory metadata, starting a fresh session");
                None
            }
        };

        let (working, counter) = match &metadata {
            Some(meta) => {
                let path = base
                    .join(TEMPORARY_DIR)
                    .join(format!("session_{}.json", meta.current_session_id));
                match read_json::<SessionSnapshot>(&path) {
                    Ok(Some(snapshot)) => (
                        WorkingMemory::restore(snapshot, config.working.capacity),
                        meta.message_counter,
                    ),
                    Ok(None) => {
                        tracing::warn!(path = %path.display(), "Session file missing, starting a fresh session");
                        (WorkingMemory::new(config.working.capacity), 0)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read session file, starting a fresh session");
                        (WorkingMemory::new(config.working.capacity), 0)
                    }
                }
            }
            None => (WorkingMemory::new(config.working.capacity), 0),
        };

        tracing::info!(
            path = %base.display(),
            entries = knowledge.len(),
            messages = working.len(),
            session_id = %working.session_id(),
            "Memory system loaded"
        );
        Ok(Self::with_state(config, working, knowledge, counter))
    }

    fn emit(&self, event: OperationEvent) {
        self.sink.record(event);
    }
}
