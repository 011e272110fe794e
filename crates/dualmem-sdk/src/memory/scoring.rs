//! Multi-factor relevance scoring.
//!
//! The final score is a weighted sum of five factors in [0,1]:
//!
//! | factor     | definition                                                   |
//! |------------|--------------------------------------------------------------|
//! | semantic   | similarity supplied by the caller, 0 if absent               |
//! | recency    | `exp(-age_days / 180)`, 0.5 without a timestamp              |
//! | usage      | 0.2 if unused, else `min(1, 0.2 + 0.4 ln(1 + uses))`         |
//! | success    | success rate pulled toward 0.5 for fewer than 10 outcomes    |
//! | complexity | `1 - abs(query_complexity - item_complexity)`                |
//!
//! A query-type multiplier is applied afterwards and the result clamped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dualmem_core::types::ScoringSignals;

use crate::config::ScoringWeights;
use crate::utils::age_days;

const RECENCY_HALF_LIFE_DAYS: f64 = 180.0;
const NEUTRAL: f64 = 0.5;
const USAGE_FLOOR: f64 = 0.2;
const SUCCESS_CONFIDENCE_USES: f64 = 10.0;
const QUERY_COMPLEXITY_CHARS: f64 = 200.0;

/// Query classes that adjust the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Code,
    Concept,
    Comparison,
    Troubleshooting,
    Opinion,
    General,
}

impl QueryType {
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Code => &["how to", "code", "function", "class", "implement", "error", "bug"],
            Self::Concept => &["what is", "explain", "concept", "define", "mean"],
            Self::Comparison => &["difference", "compare", "better", "versus", "vs"],
            Self::Troubleshooting => &["fix", "error", "isn't working", "problem", "debug"],
            Self::Opinion => &["should", "best practice", "recommend", "opinion"],
            Self::General => &[],
        }
    }

    /// Bucket with the most keyword hits. Ties go to the earlier bucket.
    pub fn detect(query: &str) -> Self {
        let query = query.to_lowercase();
        let mut best = (Self::General, 0usize);
        for kind in [
            Self::Code,
            Self::Concept,
            Self::Comparison,
            Self::Troubleshooting,
            Self::Opinion,
        ] {
            let hits = kind.keywords().iter().filter(|k| query.contains(*k)).count();
            if hits > best.1 {
                best = (kind, hits);
            }
        }
        best.0
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Concept => "concept",
            Self::Comparison => "comparison",
            Self::Troubleshooting => "troubleshooting",
            Self::Opinion => "opinion",
            Self::General => "general",
        }
    }
}

/// Banded reading of a final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Insufficient,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else if score >= 0.3 {
            Self::Low
        } else {
            Self::Insufficient
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Insufficient => "insufficient",
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Individual factor values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Factors {
    pub semantic: f64,
    pub recency: f64,
    pub usage: f64,
    pub success: f64,
    pub complexity: f64,
}

/// Explanation of one score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub factors: Factors,
    pub final_score: f64,
    pub query_type: QueryType,
    pub confidence: ConfidenceLevel,
}

/// One helpful/unhelpful vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub helpful: bool,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-call inputs beyond the item itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreRequest<'a> {
    pub query: &'a str,
    pub semantic_similarity: Option<f64>,
    /// Overrides the length-derived query complexity.
    pub query_complexity: Option<f64>,
    /// Overrides the scorer's weights for this call. Renormalized.
    pub weights: Option<ScoringWeights>,
}

impl<'a> ScoreRequest<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.semantic_similarity = Some(similarity);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelevanceScorer {
    weights: ScoringWeights,
    feedback: HashMap<String, Vec<Feedback>>,
}

impl RelevanceScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self {
            weights: weights.normalized(),
            feedback: HashMap::new(),
        }
    }

    pub fn weights(&self) -> ScoringWeights {
        self.weights
    }

    pub fn score(&self, signals: &ScoringSignals, request: &ScoreRequest<'_>) -> f64 {
        self.score_detailed(signals, request).final_score
    }

    pub fn score_detailed(&self, signals: &ScoringSignals, request: &ScoreRequest<'_>) -> ScoreBreakdown {
        self.score_at(signals, request, Utc::now())
    }

    /// Score as of `now`. Recency is the only time-dependent factor.
    pub fn score_at(
        &self,
        signals: &ScoringSignals,
        request: &ScoreRequest<'_>,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        let weights = request
            .weights
            .map(|w| w.normalized())
            .unwrap_or(self.weights);

        let factors = Factors {
            semantic: request.semantic_similarity.unwrap_or(0.0).clamp(0.0, 1.0),
            recency: recency_factor(signals.timestamp, now),
            usage: usage_factor(signals.usage_count),
            success: success_factor(signals.success_count, signals.failure_count),
            complexity: complexity_factor(request.query, request.query_complexity, signals.complexity),
        };

        let base = factors.semantic * weights.semantic
            + factors.recency * weights.recency
            + factors.usage * weights.usage
            + factors.success * weights.success
            + factors.complexity * weights.complexity;

        let query_type = QueryType::detect(request.query);
        let final_score = adjust_for_query_type(base, query_type, &factors).clamp(0.0, 1.0);

        ScoreBreakdown {
            factors,
            final_score,
            query_type,
            confidence: ConfidenceLevel::from_score(final_score),
        }
    }

    /// Store a vote. Scores are not affected.
    pub fn record_feedback(&mut self, item_id: &str, helpful: bool, query: &str) {
        self.feedback
            .entry(item_id.to_string())
            .or_default()
            .push(Feedback {
                helpful,
                query: query.to_string(),
                timestamp: Utc::now(),
            });
        tracing::debug!(item_id, helpful, "Recorded relevance feedback");
    }

    pub fn feedback_for(&self, item_id: &str) -> &[Feedback] {
        self.feedback.get(item_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace the weights, clamping each into [0,1] before renormalizing.
    pub fn adjust_weights(&mut self, weights: ScoringWeights) {
        let clamped = ScoringWeights {
            semantic: weights.semantic.clamp(0.0, 1.0),
            recency: weights.recency.clamp(0.0, 1.0),
            usage: weights.usage.clamp(0.0, 1.0),
            success: weights.success.clamp(0.0, 1.0),
            complexity: weights.complexity.clamp(0.0, 1.0),
        };
        self.weights = clamped.normalized();
    }
}

pub fn recency_factor(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match timestamp {
        Some(ts) => (-age_days(ts, now) / RECENCY_HALF_LIFE_DAYS).exp(),
        None => NEUTRAL,
    }
}

pub fn usage_factor(uses: u32) -> f64 {
    if uses == 0 {
        return USAGE_FLOOR;
    }
    (USAGE_FLOOR + 0.4 * (1.0 + uses as f64).ln()).min(1.0)
}

pub fn success_factor(successes: u32, failures: u32) -> f64 {
    let total = successes as f64 + failures as f64;
    if total == 0.0 {
        return NEUTRAL;
    }
    let rate = successes as f64 / total;
    let confidence = (total / SUCCESS_CONFIDENCE_USES).min(1.0);
    NEUTRAL + (rate - NEUTRAL) * confidence
}

pub fn complexity_factor(query: &str, query_complexity: Option<f64>, item_complexity: Option<f64>) -> f64 {
    let qc = query_complexity
        .unwrap_or_else(|| (query.chars().count() as f64 / QUERY_COMPLEXITY_CHARS).min(1.0))
        .clamp(0.0, 1.0);
    let ic = item_complexity.unwrap_or(NEUTRAL).clamp(0.0, 1.0);
    1.0 - (qc - ic).abs()
}

fn adjust_for_query_type(score: f64, query_type: QueryType, factors: &Factors) -> f64 {
    match query_type {
        QueryType::Code if factors.success < 0.4 => score * 0.8,
        QueryType::Troubleshooting if factors.recency > 0.8 => (score * 1.2).min(1.0),
        QueryType::Opinion if factors.usage > 0.7 => (score * 1.15).min(1.0),
        _ => score,
    }
}
