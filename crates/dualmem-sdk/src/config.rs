//! SDK Configuration
//!
//! Defines configuration options for the dual memory system.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use dualmem_core::memory::DEFAULT_CAPACITY;
use dualmem_core::types::CompressionLevel;

/// SDK configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SDKConfig {
    /// Directory holding `permanent/`, `temporary/` and the metadata file
    pub base_path: PathBuf,

    /// Working memory configuration
    pub working: WorkingConfig,

    /// Compressor configuration
    pub compression: CompressionConfig,

    /// Hybrid search and cache configuration
    pub search: SearchConfig,

    /// Relevance factor weights
    pub scoring: ScoringWeights,

    /// Promotion pipeline configuration
    pub promotion: PromotionConfig,
}

impl Default for SDKConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("memory"),
            working: WorkingConfig::default(),
            compression: CompressionConfig::default(),
            search: SearchConfig::default(),
            scoring: ScoringWeights::default(),
            promotion: PromotionConfig::default(),
        }
    }
}

/// Working memory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingConfig {
    /// Messages retained before the oldest is evicted (default: 50)
    pub capacity: usize,
}

impl Default for WorkingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Compressor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Default level (default: balanced)
    pub level: CompressionLevel,

    /// Leave code untouched (default: true)
    pub preserve_code: bool,

    /// Summary/original size above which a retry at aggressive runs (default: 0.5)
    pub max_summary_ratio: f64,

    /// Compress long entries on store (default: true)
    pub auto_compress: bool,

    /// Content length in chars that triggers auto-compression (default: 1000)
    pub threshold_chars: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: CompressionLevel::Balanced,
            preserve_code: true,
            max_summary_ratio: 0.5,
            auto_compress: true,
            threshold_chars: 1000,
        }
    }
}

/// Hybrid search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Cached queries kept (default: 100)
    pub cache_capacity: usize,

    /// Cached result lifetime in seconds (default: 3600 = 1 hour)
    pub cache_ttl_secs: u64,

    pub exact_weight: f64,
    pub keyword_weight: f64,
    pub semantic_weight: f64,

    /// Raw hits fetched per requested result before rescoring (default: 2)
    pub candidate_multiplier: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 100,
            cache_ttl_secs: 3600, // 1 hour
            exact_weight: 1.0,
            keyword_weight: 0.6,
            semantic_weight: 0.8,
            candidate_multiplier: 2,
        }
    }
}

/// Relevance factor weights. Renormalized when they do not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub semantic: f64,
    pub recency: f64,
    pub usage: f64,
    pub success: f64,
    pub complexity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.35,
            recency: 0.15,
            usage: 0.10,
            success: 0.25,
            complexity: 0.15,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.semantic + self.recency + self.usage + self.success + self.complexity
    }

    fn as_array(&self) -> [f64; 5] {
        [
            self.semantic,
            self.recency,
            self.usage,
            self.success,
            self.complexity,
        ]
    }

    /// Scale so the weights sum to 1. Degenerate weights fall back to the defaults.
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if sum <= 0.0 || !sum.is_finite() || self.as_array().iter().any(|w| *w < 0.0) {
            return Self::default();
        }
        Self {
            semantic: self.semantic / sum,
            recency: self.recency / sum,
            usage: self.usage / sum,
            success: self.success / sum,
            complexity: self.complexity / sum,
        }
    }
}

/// Promotion pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Minimum judge score to promote (default: 0.7)
    pub quality_threshold: f64,

    /// Messages between automatic promotion passes (default: 10)
    pub auto_analyze_frequency: u32,

    /// Shorter code snippets are not considered (default: 30)
    pub min_snippet_chars: usize,

    /// Conversations shorter than this are not considered (default: 4)
    pub min_conversation_messages: usize,

    /// Per-candidate judge timeout in seconds (default: 60)
    pub judge_timeout_secs: u64,

    /// Skip candidates whose content hash was already promoted (default: true)
    pub dedup: bool,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.7,
            auto_analyze_frequency: 10,
            min_snippet_chars: 30,
            min_conversation_messages: 4,
            judge_timeout_secs: 60,
            dedup: true,
        }
    }
}

impl SDKConfig {
    /// Create a new SDK config rooted at the given directory
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    /// Set the working memory capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.working.capacity = capacity;
        self
    }

    /// Set compression configuration
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// Set search configuration
    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    /// Set scoring weights
    pub fn with_scoring(mut self, scoring: ScoringWeights) -> Self {
        self.scoring = scoring;
        self
    }

    /// Set promotion configuration
    pub fn with_promotion(mut self, promotion: PromotionConfig) -> Self {
        self.promotion = promotion;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.working.capacity == 0 {
            return Err(invalid("working.capacity", "must be greater than 0"));
        }

        if self.search.cache_capacity == 0 {
            return Err(invalid("search.cache_capacity", "must be greater than 0"));
        }

        if self.search.candidate_multiplier == 0 {
            return Err(invalid("search.candidate_multiplier", "must be greater than 0"));
        }

        for (field, weight) in [
            ("search.exact_weight", self.search.exact_weight),
            ("search.keyword_weight", self.search.keyword_weight),
            ("search.semantic_weight", self.search.semantic_weight),
        ] {
            if weight < 0.0 {
                return Err(invalid(field, "must not be negative"));
            }
        }

        let weights = self.scoring.as_array();
        if weights.iter().any(|w| *w < 0.0) {
            return Err(invalid("scoring", "weights must not be negative"));
        }
        if self.scoring.sum() <= 0.0 {
            return Err(invalid("scoring", "weights must sum to more than 0"));
        }

        for (field, value) in [
            ("compression.max_summary_ratio", self.compression.max_summary_ratio),
            ("promotion.quality_threshold", self.promotion.quality_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, "must be between 0 and 1"));
            }
        }

        if self.promotion.auto_analyze_frequency == 0 {
            return Err(invalid(
                "promotion.auto_analyze_frequency",
                "must be greater than 0",
            ));
        }

        if self.promotion.judge_timeout_secs == 0 {
            return Err(invalid("promotion.judge_timeout_secs", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SDKConfig::default();
        assert_eq!(config.base_path, PathBuf::from("memory"));
        assert_eq!(config.working.capacity, 50);
        assert_eq!(config.compression.level, CompressionLevel::Balanced);
        assert_eq!(config.search.cache_ttl_secs, 3600);
        assert_eq!(config.promotion.quality_threshold, 0.7);
        assert_eq!(config.promotion.auto_analyze_frequency, 10);
        assert!((config.scoring.sum() - 1.0).abs() < 1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SDKConfig::new("/tmp/mem").with_capacity(10).with_promotion(PromotionConfig {
            dedup: false,
            ..Default::default()
        });

        assert_eq!(config.base_path, PathBuf::from("/tmp/mem"));
        assert_eq!(config.working.capacity, 10);
        assert!(!config.promotion.dedup);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SDKConfig::default();
        config.working.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = SDKConfig::default();
        config.promotion.quality_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = SDKConfig::default();
        config.scoring = ScoringWeights {
            semantic: 0.0,
            recency: 0.0,
            usage: 0.0,
            success: 0.0,
            complexity: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SDKConfig =
            serde_json::from_str(r#"{"promotion": {"quality_threshold": 0.8}}"#).unwrap();
        assert_eq!(config.promotion.quality_threshold, 0.8);
        assert_eq!(config.promotion.auto_analyze_frequency, 10);
        assert_eq!(config.working.capacity, 50);
    }

    #[test]
    fn test_weights_normalize() {
        let weights = ScoringWeights {
            semantic: 2.0,
            recency: 1.0,
            usage: 1.0,
            success: 0.0,
            complexity: 0.0,
        }
        .normalized();
        assert!((weights.semantic - 0.5).abs() < 1e-9);
        assert!((weights.sum() - 1.0).abs() < 1e-9);
    }
}
