//! Memory processing on top of the two stores.
//!
//! - **compression**: reversible extractive summaries of knowledge entries
//! - **scoring**: multi-factor relevance with query-type adjustment
//! - **cache** / **search**: hybrid exact/keyword/semantic search behind a TTL cache
//! - **promotion**: judge-gated transfer from working memory to knowledge
//! - **telemetry**: operation events for an injected sink

pub mod cache;
pub mod compression;
pub mod promotion;
pub mod scoring;
pub mod search;
pub mod telemetry;

pub use cache::TtlCache;
pub use compression::{CompressionStats, Compressor, LevelParams, detect_content_kind};
pub use promotion::{
    CANDIDATE_HASH_KEY, Candidate, CandidateKind, PipelineState, PromotionPipeline,
    PromotionReport, QualityJudge, Verdict, judge_candidates, parse_verdicts,
};
pub use scoring::{ConfidenceLevel, QueryType, RelevanceScorer, ScoreBreakdown, ScoreRequest};
pub use search::{ScoredItem, SearchCache, SearchStats, SearchWeights, SemanticSearch};
pub use telemetry::{
    NoopSink, OperationEvent, OperationSink, OperationType, RecordingSink, TracingSink,
};
