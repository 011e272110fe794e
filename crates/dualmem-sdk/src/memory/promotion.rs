//! Promotion of working-memory observations into the knowledge store.
//!
//! A pass collects candidates from the working memory, asks a
//! [`QualityJudge`] about each, and inserts every verdict that is marked for
//! inclusion and meets the quality threshold.
//!
//! ```text
//! Collecting ──(frequency reached | explicit flag)──▶ Analyzing
//!     ▲                                                   │
//!     └────────────── Promoted | Discarded ◀──────────────┘
//! ```
//!
//! Judge errors and timeouts discard the candidate and never fail the pass.
//! Candidates whose text hash is already recorded on an entry are skipped
//! when dedup is enabled.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use dualmem_core::memory::{KnowledgeStore, MemoryStore, WorkingMemory, truncate_chars};
use dualmem_core::types::{CodeSnippet, Metadata, NewEntry, SourceType};

use crate::{SDKError, SDKResult};
use crate::config::PromotionConfig;
use crate::utils::content_hash;

/// Metadata key holding the SHA-256 of the candidate text.
pub const CANDIDATE_HASH_KEY: &str = "candidate_hash";

/// Per-message cap when a conversation is rendered as one candidate.
const CONVERSATION_MESSAGE_CHARS: usize = 1000;

const DEFAULT_CATEGORY: &str = "general";

/// What a candidate was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Solution,
    CodeSnippet,
    ErrorCorrection,
    Conversation,
}

impl CandidateKind {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Solution | Self::CodeSnippet => SourceType::Conversation,
            Self::ErrorCorrection => SourceType::ErrorCorrection,
            Self::Conversation => SourceType::ConversationConcept,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solution => "solution",
            Self::CodeSnippet => "code_snippet",
            Self::ErrorCorrection => "error_correction",
            Self::Conversation => "conversation",
        }
    }

    fn default_title(&self) -> &'static str {
        match self {
            Self::Solution => "Solution",
            Self::CodeSnippet => "Code snippet",
            Self::ErrorCorrection => "Error correction",
            Self::Conversation => "Conversation concept",
        }
    }
}

/// One observation offered to the judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub text: String,
    pub context: String,
    pub session_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Candidate {
    pub fn new(
        kind: CandidateKind,
        text: impl Into<String>,
        context: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            text: text.into(),
            context: context.into(),
            session_id: session_id.into(),
            metadata: Metadata::new(),
        }
    }

    /// Candidate for a single solved problem.
    pub fn solution(session_id: &str, problem: &str, solution: &str) -> Self {
        Self::new(
            CandidateKind::Solution,
            format!("Problem: {problem}\nSolution: {solution}"),
            "solution_attempt",
            session_id,
        )
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.text)
    }
}

/// The judge's decision about one piece of knowledge.
///
/// Missing fields fall back to the candidate when the entry is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Verdict {
    pub title: String,
    pub content: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub tags: Vec<String>,
    pub quality_score: f64,
    pub include: bool,
}

/// External quality judge, typically an LLM call.
#[async_trait]
pub trait QualityJudge: Send + Sync {
    /// Zero or more verdicts for the candidate. A conversation may yield several.
    async fn judge(&self, candidate: &Candidate) -> SDKResult<Vec<Verdict>>;
}

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Collecting,
    Analyzing,
    Promoted,
    Discarded,
}

/// Outcome of one promotion pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub candidates: usize,
    pub judged: usize,
    pub promoted: Vec<String>,
    pub discarded: usize,
    pub duplicates: usize,
    pub judge_failures: usize,
}

impl PromotionReport {
    pub fn merge(&mut self, other: PromotionReport) {
        self.candidates += other.candidates;
        self.judged += other.judged;
        self.promoted.extend(other.promoted);
        self.discarded += other.discarded;
        self.duplicates += other.duplicates;
        self.judge_failures += other.judge_failures;
    }
}

/// Candidates with the verdicts the judge returned for them.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    judged: Vec<(Candidate, Vec<Verdict>)>,
    report: PromotionReport,
}

#[derive(Debug, Clone)]
pub struct PromotionPipeline {
    config: PromotionConfig,
    judge_timeout: Duration,
    state: PipelineState,
    last_outcome: Option<PipelineState>,
}

impl PromotionPipeline {
    pub fn new(config: PromotionConfig) -> Self {
        let judge_timeout = Duration::from_secs(config.judge_timeout_secs);
        Self {
            config,
            judge_timeout,
            state: PipelineState::Collecting,
            last_outcome: None,
        }
    }

    pub fn with_judge_timeout(mut self, timeout: Duration) -> Self {
        self.judge_timeout = timeout;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// `Promoted` or `Discarded` for the most recent pass.
    pub fn last_outcome(&self) -> Option<PipelineState> {
        self.last_outcome
    }

    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    /// Everything in the working memory worth judging.
    pub fn collect_candidates(&self, memory: &WorkingMemory) -> Vec<Candidate> {
        let session_id = memory.session_id();
        let mut candidates = Vec::new();

        for attempt in memory.solution_attempts().iter().filter(|a| a.successful) {
            candidates.push(Candidate::solution(session_id, &attempt.problem, &attempt.solution));
        }

        for snippet in memory.code_snippets() {
            if snippet.code.chars().count() < self.config.min_snippet_chars {
                continue;
            }
            let mut candidate = Candidate::new(
                CandidateKind::CodeSnippet,
                snippet.code.clone(),
                snippet.context.clone(),
                session_id,
            );
            candidate
                .metadata
                .insert("language".into(), json!(snippet.language));
            candidates.push(candidate);
        }

        for correction in memory.error_corrections() {
            if correction.error.trim().is_empty() || correction.correction.trim().is_empty() {
                continue;
            }
            candidates.push(Candidate::new(
                CandidateKind::ErrorCorrection,
                format!(
                    "Error: {}\nCorrection: {}",
                    correction.error, correction.correction
                ),
                "error_correction",
                session_id,
            ));
        }

        if memory.len() >= self.config.min_conversation_messages {
            let transcript = memory
                .all()
                .map(|m| {
                    format!(
                        "{}: {}",
                        m.role,
                        truncate_chars(&m.content, CONVERSATION_MESSAGE_CHARS)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            candidates.push(Candidate::new(
                CandidateKind::Conversation,
                transcript,
                "conversation",
                session_id,
            ));
        }

        tracing::debug!(count = candidates.len(), "Collected promotion candidates");
        candidates
    }

    /// Drop candidates already promoted or repeated within the batch.
    ///
    /// Returns the survivors and how many were dropped. A no-op when dedup
    /// is disabled.
    pub fn filter_known(&self, candidates: Vec<Candidate>, store: &KnowledgeStore) -> (Vec<Candidate>, usize) {
        if !self.config.dedup {
            return (candidates, 0);
        }
        let mut seen = HashSet::new();
        let before = candidates.len();
        let fresh: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                let hash = c.content_hash();
                seen.insert(hash.clone()) && store.find_by_metadata(CANDIDATE_HASH_KEY, &json!(hash)).is_none()
            })
            .collect();
        let dropped = before - fresh.len();
        (fresh, dropped)
    }

    /// Ask the judge about each candidate under the configured timeout.
    pub async fn evaluate(&mut self, candidates: Vec<Candidate>, judge: &dyn QualityJudge) -> Evaluation {
        let timeout = self.begin_analysis();
        judge_candidates(candidates, judge, timeout).await
    }

    /// Enter `Analyzing` and hand back the judge timeout.
    ///
    /// Callers that must not hold the pipeline while the judge runs pair
    /// this with [`judge_candidates`] and then [`Self::promote`].
    pub fn begin_analysis(&mut self) -> Duration {
        self.transition(PipelineState::Analyzing);
        self.judge_timeout
    }

    /// Insert every passing verdict into `store`.
    pub fn promote(&mut self, evaluation: Evaluation, store: &mut KnowledgeStore) -> PromotionReport {
        let Evaluation { judged, mut report } = evaluation;

        for (candidate, verdicts) in judged {
            let hash = candidate.content_hash();
            if self.config.dedup && store.find_by_metadata(CANDIDATE_HASH_KEY, &json!(hash)).is_some() {
                report.duplicates += 1;
                continue;
            }

            for verdict in verdicts {
                if !self.passes(&verdict) {
                    tracing::debug!(
                        kind = candidate.kind.as_str(),
                        score = verdict.quality_score,
                        include = verdict.include,
                        "Verdict below threshold, discarding"
                    );
                    report.discarded += 1;
                    continue;
                }
                let id = store.add(build_entry(&candidate, verdict, &hash));
                tracing::info!(entry_id = %id, kind = candidate.kind.as_str(), "Promoted knowledge entry");
                report.promoted.push(id);
            }
        }

        let outcome = if report.promoted.is_empty() {
            PipelineState::Discarded
        } else {
            PipelineState::Promoted
        };
        self.transition(outcome);
        self.last_outcome = Some(outcome);
        self.transition(PipelineState::Collecting);
        report
    }

    /// Full pass: dedup, judge, insert.
    pub async fn run(
        &mut self,
        candidates: Vec<Candidate>,
        judge: &dyn QualityJudge,
        store: &mut KnowledgeStore,
    ) -> PromotionReport {
        let total = candidates.len();
        let (fresh, duplicates) = self.filter_known(candidates, store);
        let evaluation = self.evaluate(fresh, judge).await;
        let mut report = self.promote(evaluation, store);
        report.candidates = total;
        report.duplicates += duplicates;
        report
    }

    fn passes(&self, verdict: &Verdict) -> bool {
        verdict.include && verdict.quality_score >= self.config.quality_threshold
    }

    fn transition(&mut self, to: PipelineState) {
        tracing::debug!(from = ?self.state, to = ?to, "Promotion pipeline transition");
        self.state = to;
    }
}

/// Judge each candidate in turn. Errors and timeouts count as judge
/// failures and drop the candidate.
pub async fn judge_candidates(
    candidates: Vec<Candidate>,
    judge: &dyn QualityJudge,
    timeout: Duration,
) -> Evaluation {
    let mut evaluation = Evaluation {
        judged: Vec::with_capacity(candidates.len()),
        report: PromotionReport {
            candidates: candidates.len(),
            ..Default::default()
        },
    };

    for candidate in candidates {
        let outcome = tokio::time::timeout(timeout, judge.judge(&candidate))
            .await
            .unwrap_or_else(|_| Err(SDKError::timeout(timeout.as_millis() as u64)));

        match outcome {
            Ok(verdicts) => {
                evaluation.report.judged += 1;
                if verdicts.is_empty() {
                    evaluation.report.discarded += 1;
                } else {
                    evaluation.judged.push((candidate, verdicts));
                }
            }
            Err(e) if e.is_timeout() => {
                evaluation.report.judge_failures += 1;
                tracing::warn!(kind = candidate.kind.as_str(), error = %e, "Quality judge timed out, discarding candidate");
            }
            Err(e) => {
                evaluation.report.judge_failures += 1;
                tracing::warn!(kind = candidate.kind.as_str(), error = %e, "Quality judge failed, discarding candidate");
            }
        }
    }

    evaluation
}

fn build_entry(candidate: &Candidate, verdict: Verdict, hash: &str) -> NewEntry {
    let title = non_empty(verdict.title).unwrap_or_else(|| candidate.kind.default_title().to_string());
    let content = non_empty(verdict.content).unwrap_or_else(|| candidate.text.clone());
    let category = non_empty(verdict.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let mut entry = NewEntry::new(title, content, category)
        .with_source(candidate.kind.source_type(), Some(candidate.session_id.clone()))
        .with_tags(verdict.tags.into_iter().filter(|t| !t.trim().is_empty()).collect::<BTreeSet<_>>())
        .with_quality(verdict.quality_score)
        .with_metadata(CANDIDATE_HASH_KEY, json!(hash))
        .with_metadata("candidate_kind", json!(candidate.kind.as_str()));
    entry.subcategory = verdict.subcategory.and_then(non_empty);

    if candidate.kind == CandidateKind::CodeSnippet {
        let language = candidate
            .metadata
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        entry = entry.with_snippet(CodeSnippet {
            code: candidate.text.clone(),
            language: language.to_string(),
            context: candidate.context.clone(),
        });
    }
    entry
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Parse judge output into verdicts.
///
/// Accepts a JSON object or array, optionally inside a markdown fence or
/// surrounded by prose. Anything unparseable yields no verdicts.
pub fn parse_verdicts(response: &str) -> Vec<Verdict> {
    let trimmed = response.trim();

    let object_start = trimmed.find('{');
    let array_start = trimmed.find('[');
    let parsed = match (array_start, object_start) {
        (Some(a), Some(o)) if a < o => parse_array(trimmed, a),
        (Some(a), None) => parse_array(trimmed, a),
        (_, Some(o)) => {
            let end = trimmed.rfind('}').map(|i| i + 1).unwrap_or(trimmed.len());
            if end <= o {
                Err("unbalanced object in judge response".to_string())
            } else {
                serde_json::from_str::<Verdict>(&trimmed[o..end])
                    .map(|v| vec![v])
                    .map_err(|e| e.to_string())
            }
        }
        (None, None) => Err("no JSON in judge response".to_string()),
    };

    match parsed {
        Ok(verdicts) => verdicts,
        Err(e) => {
            tracing::warn!("Failed to parse judge response: {e}");
            tracing::debug!("Raw response: {response}");
            Vec::new()
        }
    }
}

fn parse_array(text: &str, start: usize) -> Result<Vec<Verdict>, String> {
    let end = text.rfind(']').map(|i| i + 1).unwrap_or(text.len());
    if end <= start {
        return Err("unbalanced array in judge response".to_string());
    }
    serde_json::from_str::<Vec<Verdict>>(&text[start..end]).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualmem_core::types::Message;

    struct ScriptedJudge {
        verdicts: Vec<Verdict>,
    }

    #[async_trait]
    impl QualityJudge for ScriptedJudge {
        async fn judge(&self, _candidate: &Candidate) -> SDKResult<Vec<Verdict>> {
            Ok(self.verdicts.clone())
        }
    }

    struct FailingJudge;

    #[async_trait]
    impl QualityJudge for FailingJudge {
        async fn judge(&self, _candidate: &Candidate) -> SDKResult<Vec<Verdict>> {
            Err(SDKError::judge_unavailable("offline"))
        }
    }

    struct SlowJudge;

    #[async_trait]
    impl QualityJudge for SlowJudge {
        async fn judge(&self, _candidate: &Candidate) -> SDKResult<Vec<Verdict>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn verdict(score: f64, include: bool) -> Verdict {
        Verdict {
            title: "Eager loading".into(),
            content: "Use with() to avoid N+1 queries".into(),
            category: "laravel".into(),
            subcategory: Some("eloquent".into()),
            tags: vec!["eloquent".into(), "performance".into()],
            quality_score: score,
            include,
        }
    }

    fn solution_candidate() -> Candidate {
        Candidate::solution("session-1", "N+1 queries on index page", "Eager load with with()")
    }

    #[tokio::test]
    async fn test_score_below_threshold_is_not_promoted() {
        let mut pipeline = PromotionPipeline::new(PromotionConfig::default());
        let mut store = KnowledgeStore::new();
        let judge = ScriptedJudge {
            verdicts: vec![verdict(0.69, true)],
        };

        let report = pipeline.run(vec![solution_candidate()], &judge, &mut store).await;

        assert!(report.promoted.is_empty());
        assert_eq!(report.discarded, 1);
        assert!(store.is_empty());
        assert_eq!(pipeline.last_outcome(), Some(PipelineState::Discarded));
        assert_eq!(pipeline.state(), PipelineState::Collecting);
    }

    #[tokio::test]
    async fn test_passing_verdict_is_promoted() {
        let mut pipeline = PromotionPipeline::new(PromotionConfig::default());
        let mut store = KnowledgeStore::new();
        let judge = ScriptedJudge {
            verdicts: vec![verdict(0.7, true)],
        };

        let report = pipeline.run(vec![solution_candidate()], &judge, &mut store).await;

        assert_eq!(report.promoted.len(), 1);
        let entry = store.get(&report.promoted[0]).unwrap();
        assert_eq!(entry.title, "Eager loading");
        assert_eq!(entry.source_type, SourceType::Conversation);
        assert_eq!(entry.source_reference.as_deref(), Some("session-1"));
        assert_eq!(entry.subcategory.as_deref(), Some("eloquent"));
        assert!(entry.tags.contains("performance"));
        assert_eq!(
            entry.metadata[CANDIDATE_HASH_KEY],
            json!(solution_candidate().content_hash())
        );
        assert_eq!(pipeline.last_outcome(), Some(PipelineState::Promoted));
    }

    #[tokio::test]
    async fn test_include_false_is_not_promoted() {
        let mut pipeline = PromotionPipeline::new(PromotionConfig::default());
        let mut store = KnowledgeStore::new();
        let judge = ScriptedJudge {
            verdicts: vec![verdict(0.95, false)],
        };
        let report = pipeline.run(vec![solution_candidate()], &judge, &mut store).await;
        assert!(report.promoted.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_judge_failure_and_timeout_are_absorbed() {
        let mut store = KnowledgeStore::new();

        let mut pipeline = PromotionPipeline::new(PromotionConfig::default());
        let report = pipeline.run(vec![solution_candidate()], &FailingJudge, &mut store).await;
        assert_eq!(report.judge_failures, 1);
        assert_eq!(report.judged, 0);

        let mut pipeline = PromotionPipeline::new(PromotionConfig::default())
            .with_judge_timeout(Duration::from_millis(20));
        let report = pipeline.run(vec![solution_candidate()], &SlowJudge, &mut store).await;
        assert_eq!(report.judge_failures, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_dedup_skips_promoted_candidate() {
        let mut pipeline = PromotionPipeline::new(PromotionConfig::default());
        let mut store = KnowledgeStore::new();
        let judge = ScriptedJudge {
            verdicts: vec![verdict(0.9, true)],
        };

        pipeline.run(vec![solution_candidate()], &judge, &mut store).await;
        let second = pipeline
            .run(vec![solution_candidate(), solution_candidate()], &judge, &mut store)
            .await;

        assert_eq!(second.duplicates, 2);
        assert_eq!(second.candidates, 2);
        assert!(second.promoted.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_disabled_repromotes() {
        let config = PromotionConfig {
            dedup: false,
            ..Default::default()
        };
        let mut pipeline = PromotionPipeline::new(config);
        let mut store = KnowledgeStore::new();
        let judge = ScriptedJudge {
            verdicts: vec![verdict(0.9, true)],
        };

        pipeline.run(vec![solution_candidate()], &judge, &mut store).await;
        pipeline.run(vec![solution_candidate()], &judge, &mut store).await;
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_fields_fall_back_to_candidate() {
        let mut pipeline = PromotionPipeline::new(PromotionConfig::default());
        let mut store = KnowledgeStore::new();
        let judge = ScriptedJudge {
            verdicts: vec![Verdict {
                quality_score: 0.8,
                include: true,
                ..Default::default()
            }],
        };
        let candidate = solution_candidate();
        let report = pipeline.run(vec![candidate.clone()], &judge, &mut store).await;

        let entry = store.get(&report.promoted[0]).unwrap();
        assert_eq!(entry.title, "Solution");
        assert_eq!(entry.content, candidate.text);
        assert_eq!(entry.category, "general");
    }

    #[test]
    fn test_collect_candidates() {
        let mut memory = WorkingMemory::new(50);
        memory.append(Message::user("How do I fix N+1 queries?"));
        memory.append(Message::assistant(
            "Use eager loading:\n```php\n$posts = Post::with('comments')->get();\n```",
        ));
        memory.append(Message::user("Thanks"));
        memory.append(Message::assistant("Glad it helped"));
        memory.record_solution_attempt("N+1", "eager load", true);
        memory.record_solution_attempt("slow page", "add cache", false);
        memory.record_error_correction("Class not found", "run composer dump-autoload");
        memory.record_error_correction("", "ignored");

        let pipeline = PromotionPipeline::new(PromotionConfig::default());
        let candidates = pipeline.collect_candidates(&memory);
        let kinds: Vec<CandidateKind> = candidates.iter().map(|c| c.kind).collect();

        assert_eq!(
            kinds,
            vec![
                CandidateKind::Solution,
                CandidateKind::CodeSnippet,
                CandidateKind::ErrorCorrection,
                CandidateKind::Conversation,
            ]
        );
        assert_eq!(candidates[1].metadata["language"], "php");
        assert!(candidates[3].text.starts_with("user: How do I fix"));
        assert!(candidates.iter().all(|c| c.session_id == memory.session_id()));
    }

    #[test]
    fn test_short_conversation_and_snippet_skipped() {
        let mut memory = WorkingMemory::new(50);
        memory.append(Message::user("hi"));
        memory.append(Message::assistant("```js\nx()\n```"));

        let pipeline = PromotionPipeline::new(PromotionConfig::default());
        assert!(pipeline.collect_candidates(&memory).is_empty());
    }

    #[test]
    fn test_parse_verdicts_formats() {
        let fenced = "```json\n{\"title\": \"T\", \"quality_score\": 0.8, \"include\": true}\n```";
        let parsed = parse_verdicts(fenced);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "T");
        assert!(parsed[0].include);

        let prose = "Here are the concepts:\n[{\"title\": \"A\"}, {\"title\": \"B\", \"tags\": [\"x\"]}]\nDone.";
        let parsed = parse_verdicts(prose);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].tags, vec!["x".to_string()]);
        assert!(!parsed[0].include);

        assert!(parse_verdicts("not json at all").is_empty());
        assert!(parse_verdicts("{\"quality_score\": \"high\"}").is_empty());
        assert!(parse_verdicts("} backwards {").is_empty());
    }
}
