//! Hybrid search with a result cache.
//!
//! Each item's relevance is the sum of an exact-substring score and a
//! keyword-overlap score, each scaled by its configured weight. When fewer
//! than `top_k` items match and a [`SemanticSearch`] is supplied, its results
//! are merged in by id. Ranked results are cached per normalized query and
//! result count; a hit returns the stored list without rescoring. Every item
//! in a list carries the instant it was ranked, so later scoring of a cached
//! list can be pinned to the same clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dualmem_core::types::SearchItem;

use super::cache::TtlCache;
use crate::config::SearchConfig;
use crate::utils::elapsed_ms;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "in", "on", "at", "to", "for", "with", "by",
    "about", "like", "and",
];

/// Pluggable similarity source, e.g. an embedding index.
pub trait SemanticSearch: Send + Sync {
    /// `(item id, similarity in [0,1])` for the items worth returning.
    fn search(&self, query: &str, items: &[SearchItem]) -> Vec<(String, f64)>;
}

/// A search hit with its hybrid relevance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: SearchItem,
    pub relevance: f64,
    pub ranked_at: DateTime<Utc>,
}

/// Search and cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub total_searches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub cached_queries: usize,
    pub capacity: usize,
    pub avg_search_ms: f64,
}

/// Per-strategy multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWeights {
    pub exact: f64,
    pub keyword: f64,
    pub semantic: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    top_k: usize,
}

/// Hybrid search over search items, fronted by a [`TtlCache`].
#[derive(Debug)]
pub struct SearchCache {
    cache: TtlCache<CacheKey, Vec<ScoredItem>>,
    weights: SearchWeights,
    total_searches: u64,
    cache_hits: u64,
    cache_misses: u64,
    total_ms: f64,
}

impl SearchCache {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            cache: TtlCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_secs),
            ),
            weights: SearchWeights {
                exact: config.exact_weight,
                keyword: config.keyword_weight,
                semantic: config.semantic_weight,
            },
            total_searches: 0,
            cache_hits: 0,
            cache_misses: 0,
            total_ms: 0.0,
        }
    }

    pub fn weights(&self) -> SearchWeights {
        self.weights
    }

    /// Rank `items` for `query`, best first, at most `top_k` long.
    pub fn search(
        &mut self,
        query: &str,
        items: &[SearchItem],
        semantic: Option<&dyn SemanticSearch>,
        top_k: usize,
    ) -> Vec<ScoredItem> {
        let normalized = normalize_query(query);
        if normalized.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let start = Instant::now();
        self.total_searches += 1;
        let key = CacheKey {
            query: normalized,
            top_k,
        };

        if let Some(cached) = self.cache.get(&key) {
            let results = cached.clone();
            self.cache_hits += 1;
            self.total_ms += elapsed_ms(start);
            tracing::debug!(query = %key.query, results = results.len(), "Search cache hit");
            return results;
        }
        self.cache_misses += 1;

        let ranked_at = Utc::now();
        let mut results = self.rank(&key.query, items, ranked_at);

        if results.len() < top_k {
            if let Some(semantic) = semantic {
                self.merge_semantic(&mut results, semantic.search(query, items), items, ranked_at);
            }
        }

        results.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);

        tracing::debug!(
            query = %key.query,
            candidates = items.len(),
            results = results.len(),
            "Search cache miss"
        );
        self.cache.insert(key, results.clone());
        self.total_ms += elapsed_ms(start);
        results
    }

    fn rank(&self, query: &str, items: &[SearchItem], ranked_at: DateTime<Utc>) -> Vec<ScoredItem> {
        let keywords = keywords(query);
        items
            .iter()
            .filter_map(|item| {
                let text = searchable_text(item);
                let relevance = exact_score(query, &text) * self.weights.exact
                    + keyword_score(&keywords, &text) * self.weights.keyword;
                (relevance > 0.0).then(|| ScoredItem {
                    item: item.clone(),
                    relevance,
                    ranked_at,
                })
            })
            .collect()
    }

    fn merge_semantic(
        &self,
        results: &mut Vec<ScoredItem>,
        semantic: Vec<(String, f64)>,
        items: &[SearchItem],
        ranked_at: DateTime<Utc>,
    ) {
        let positions: HashMap<String, usize> = results
            .iter()
            .enumerate()
            .map(|(i, r)| (r.item.id.clone(), i))
            .collect();

        for (id, similarity) in semantic {
            let weighted = similarity.clamp(0.0, 1.0) * self.weights.semantic;
            match positions.get(&id) {
                Some(&i) => {
                    results[i].relevance = results[i].relevance.max(weighted);
                }
                None if weighted > 0.0 => {
                    if let Some(item) = items.iter().find(|item| item.id == id) {
                        if !results.iter().any(|r| r.item.id == id) {
                            results.push(ScoredItem {
                                item: item.clone(),
                                relevance: weighted,
                                ranked_at,
                            });
                        }
                    }
                }
                None => {}
            }
        }
    }

    /// Replace the strategy weights and drop cached results.
    pub fn adjust_weights(&mut self, weights: SearchWeights) {
        self.weights = SearchWeights {
            exact: weights.exact.max(0.0),
            keyword: weights.keyword.max(0.0),
            semantic: weights.semantic.max(0.0),
        };
        self.cache.clear();
    }

    /// Drop every cached result. Counters are kept.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> SearchStats {
        let total = self.total_searches;
        SearchStats {
            total_searches: total,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            hit_rate: if total > 0 {
                self.cache_hits as f64 / total as f64
            } else {
                0.0
            },
            cached_queries: self.cache.len(),
            capacity: self.cache.capacity(),
            avg_search_ms: if total > 0 {
                self.total_ms / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Cache key form of a query.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

fn searchable_text(item: &SearchItem) -> String {
    match &item.title {
        Some(title) => format!("{}\n{}", title, item.content).to_lowercase(),
        None => item.content.to_lowercase(),
    }
}

fn keywords(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Position- and coverage-weighted substring score in [0,1].
fn exact_score(query: &str, text: &str) -> f64 {
    let Some(byte_pos) = text.find(query) else {
        return 0.0;
    };
    let len = text.chars().count() as f64;
    let pos = text[..byte_pos].chars().count() as f64;
    let qlen = query.chars().count() as f64;
    (1.0 - pos / len) * 0.5 + (qlen / len) * 0.5
}

/// Fraction of query keywords present in the text.
fn keyword_score(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let matches = keywords.iter().filter(|k| text.contains(k.as_str())).count();
    matches as f64 / keywords.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualmem_core::types::{ItemSource, ScoringSignals};

    fn item(id: &str, content: &str) -> SearchItem {
        SearchItem {
            id: id.into(),
            source: ItemSource::Knowledge,
            title: None,
            content: content.into(),
            signals: ScoringSignals::default(),
        }
    }

    fn corpus() -> Vec<SearchItem> {
        vec![
            item("1", "Eloquent relationships: hasMany and belongsTo"),
            item("2", "Queue workers process jobs in the background"),
            item("3", "Using eloquent scopes for reusable queries"),
        ]
    }

    struct FixedSemantic(Vec<(String, f64)>);

    impl SemanticSearch for FixedSemantic {
        fn search(&self, _query: &str, _items: &[SearchItem]) -> Vec<(String, f64)> {
            self.0.clone()
        }
    }

    #[test]
    fn test_repeat_query_hits_cache() {
        let mut cache = SearchCache::new(&SearchConfig::default());
        let items = corpus();

        let first = cache.search("Eloquent", &items, None, 5);
        let second = cache.search("  eloquent ", &items, None, 5);

        assert!(!first.is_empty());
        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!(stats.total_searches, 2);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_cache_hit_skips_rescoring() {
        let mut cache = SearchCache::new(&SearchConfig::default());
        let first = cache.search("eloquent", &corpus(), None, 5);
        // Different items, same query: cached list comes back unchanged
        let second = cache.search("eloquent", &[], None, 5);
        assert_eq!(first, second);
    }

    #[test]
    fn test_expired_cache_rescores() {
        let config = SearchConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        };
        let mut cache = SearchCache::new(&config);
        cache.search("eloquent", &corpus(), None, 5);
        cache.search("eloquent", &corpus(), None, 5);
        assert_eq!(cache.stats().cache_misses, 2);
    }

    #[test]
    fn test_exact_match_ranks_earlier_position_higher() {
        let mut cache = SearchCache::new(&SearchConfig::default());
        let results = cache.search("eloquent", &corpus(), None, 5);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].item.id, "1");
        assert_eq!(results[1].item.id, "3");
        assert!(results[0].relevance > results[1].relevance);
    }

    #[test]
    fn test_keyword_overlap_ignores_stopwords() {
        let mut cache = SearchCache::new(&SearchConfig::default());
        let results = cache.search("the jobs in background", &corpus(), None, 5);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id, "2");
        // Both keywords present, no exact phrase match
        assert!((results[0].relevance - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_semantic_merge_when_short() {
        let mut cache = SearchCache::new(&SearchConfig::default());
        let semantic = FixedSemantic(vec![("2".into(), 0.5), ("1".into(), 1.0)]);
        let results = cache.search("eloquent", &corpus(), Some(&semantic), 5);

        assert_eq!(results.len(), 3);
        let queue = results.iter().find(|r| r.item.id == "2").unwrap();
        assert!((queue.relevance - 0.4).abs() < 1e-9);
        let first = results.iter().find(|r| r.item.id == "1").unwrap();
        assert!(first.relevance >= 0.8);
    }

    #[test]
    fn test_semantic_skipped_when_enough_hits() {
        let mut cache = SearchCache::new(&SearchConfig::default());
        let semantic = FixedSemantic(vec![("2".into(), 1.0)]);
        let results = cache.search("eloquent", &corpus(), Some(&semantic), 2);
        assert!(results.iter().all(|r| r.item.id != "2"));
    }

    #[test]
    fn test_blank_query_and_clear() {
        let mut cache = SearchCache::new(&SearchConfig::default());
        assert!(cache.search("   ", &corpus(), None, 5).is_empty());
        assert_eq!(cache.stats().total_searches, 0);

        cache.search("eloquent", &corpus(), None, 5);
        assert_eq!(cache.stats().cached_queries, 1);
        cache.clear();
        assert_eq!(cache.stats().cached_queries, 0);
    }

    #[test]
    fn test_adjust_weights_invalidates() {
        let mut cache = SearchCache::new(&SearchConfig::default());
        cache.search("eloquent", &corpus(), None, 5);
        cache.adjust_weights(SearchWeights {
            exact: 0.0,
            keyword: 1.0,
            semantic: -1.0,
        });
        assert_eq!(cache.stats().cached_queries, 0);
        assert_eq!(cache.weights().semantic, 0.0);
    }
}
