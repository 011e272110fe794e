//! Durable knowledge store.
//!
//! Entries live in an id-keyed map next to two indices:
//!
//! - `tag_index`: tag -> ids of the entries carrying that tag
//! - `categories`: category -> subcategories seen under it
//!
//! Every mutation updates the indices in the same call, so for every entry
//! `e` and every tag `t` in `e.tags`, `tag_index[t]` contains `e.id`.
//! Relationships are symmetric and deleting an entry removes every edge that
//! points at it.
//!
//! On disk the store is three JSON documents: `entries.json`,
//! `categories.json` and `tag_index.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use super::traits::{MemoryStore, SearchableStore};
use crate::error::{Error, Result};
use crate::persist::{read_json, write_json_atomic};
use crate::types::{
    ENTRY_VERSION, EntryPatch, KnowledgeEntry, NewEntry, SearchItem, SourceType,
};

pub const ENTRIES_FILE: &str = "entries.json";
pub const CATEGORIES_FILE: &str = "categories.json";
pub const TAG_INDEX_FILE: &str = "tag_index.json";

/// Quality score given to entries created without one.
pub const DEFAULT_QUALITY_SCORE: f64 = 0.5;

const TITLE_MATCH_SCORE: f64 = 0.5;
const CONTENT_MATCH_SCORE: f64 = 0.3;
const TAG_MATCH_SCORE: f64 = 0.2;

pub type CategoryMap = BTreeMap<String, BTreeSet<String>>;
pub type TagIndex = BTreeMap<String, BTreeSet<String>>;

/// Indexed map of knowledge entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeStore {
    entries: BTreeMap<String, KnowledgeEntry>,
    categories: CategoryMap,
    tag_index: TagIndex,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry and index it. Titles need not be unique.
    pub fn add(&mut self, input: NewEntry) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        // Only keep edges to entries that exist, and mirror them.
        let related: BTreeSet<String> = input
            .related_entries
            .into_iter()
            .filter(|peer| self.entries.contains_key(peer))
            .collect();
        for peer in &related {
            if let Some(peer_entry) = self.entries.get_mut(peer) {
                peer_entry.related_entries.insert(id.clone());
                peer_entry.updated_at = now;
            }
        }

        let entry = KnowledgeEntry {
            id: id.clone(),
            title: input.title,
            content: input.content,
            source_type: input.source_type,
            source_reference: input.source_reference,
            category: input.category,
            subcategory: input.subcategory,
            tags: input.tags,
            metadata: input.metadata,
            code_snippets: input.code_snippets,
            related_entries: related,
            quality_score: input
                .quality_score
                .unwrap_or(DEFAULT_QUALITY_SCORE)
                .clamp(0.0, 1.0),
            created_at: now,
            updated_at: now,
            version: ENTRY_VERSION.to_string(),
            usage: Default::default(),
            compression: None,
            original_version: None,
        };

        self.index_category(&entry.category, entry.subcategory.as_deref());
        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(id.clone());
        }
        self.entries.insert(id.clone(), entry);

        tracing::debug!(entry_id = %id, "Added knowledge entry");
        self.debug_verify();
        id
    }

    /// Apply a typed patch. Returns `false` if the id is unknown.
    ///
    /// New content without a compression patch replaces the entry's text
    /// outright, so any stored original is dropped along with the
    /// compression record.
    pub fn update(&mut self, id: &str, patch: EntryPatch) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };

        let reindex = patch.touches_indices();
        let old_tags = patch.tags.as_ref().map(|_| entry.tags.clone());
        let replaces_content = patch.content.is_some() && patch.compression.is_none();

        if let Some(title) = patch.title {
            entry.title = title;
        }
        if let Some(content) = patch.content {
            entry.content = content;
        }
        if let Some(reference) = patch.source_reference {
            entry.source_reference = reference;
        }
        if let Some(category) = patch.category {
            entry.category = category;
        }
        if let Some(subcategory) = patch.subcategory {
            entry.subcategory = subcategory;
        }
        if let Some(tags) = patch.tags {
            entry.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            entry.metadata = metadata;
        }
        if let Some(snippets) = patch.code_snippets {
            entry.code_snippets = snippets;
        }
        if let Some(score) = patch.quality_score {
            entry.quality_score = score.clamp(0.0, 1.0);
        }
        if let Some(compression) = patch.compression {
            entry.compression = compression;
        }
        if let Some(original) = patch.original_version {
            entry.original_version = original;
        }
        if replaces_content && entry.compression.is_some() {
            entry.compression = None;
            entry.original_version = None;
            tracing::debug!(entry_id = %id, "Content replaced, dropped compression record");
        }
        entry.updated_at = Utc::now();

        if !reindex {
            self.debug_verify();
            return true;
        }

        let new_tags = entry.tags.clone();
        let category = entry.category.clone();
        let subcategory = entry.subcategory.clone();

        if let Some(old_tags) = old_tags {
            for tag in old_tags.difference(&new_tags) {
                self.unindex_tag(tag, id);
            }
            for tag in new_tags.difference(&old_tags) {
                self.tag_index
                    .entry(tag.clone())
                    .or_default()
                    .insert(id.to_string());
            }
        }
        self.index_category(&category, subcategory.as_deref());

        self.debug_verify();
        true
    }

    /// Remove an entry, its tag postings and every edge pointing at it.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };

        for tag in &entry.tags {
            self.unindex_tag(tag, id);
        }

        let now = Utc::now();
        for peer in self.entries.values_mut() {
            if peer.related_entries.remove(id) {
                peer.updated_at = now;
            }
        }

        tracing::debug!(entry_id = %id, "Deleted knowledge entry");
        self.debug_verify();
        true
    }

    pub fn get(&self, id: &str) -> Option<&KnowledgeEntry> {
        self.entries.get(id)
    }

    /// All entries ordered by id.
    pub fn all(&self) -> impl Iterator<Item = &KnowledgeEntry> {
        self.entries.values()
    }

    /// Union (`match_all = false`) or intersection of the tag postings.
    pub fn search_by_tags<S: AsRef<str>>(&self, tags: &[S], match_all: bool) -> Vec<&KnowledgeEntry> {
        if tags.is_empty() {
            return Vec::new();
        }

        let empty = BTreeSet::new();
        let mut postings = tags
            .iter()
            .map(|tag| self.tag_index.get(tag.as_ref()).unwrap_or(&empty));

        let ids: BTreeSet<&String> = if match_all {
            let first: BTreeSet<&String> = postings.next().map(|p| p.iter().collect()).unwrap_or_default();
            postings.fold(first, |acc, posting| {
                acc.into_iter().filter(|id| posting.contains(*id)).collect()
            })
        } else {
            postings.flat_map(|posting| posting.iter()).collect()
        };

        ids.into_iter().filter_map(|id| self.entries.get(id)).collect()
    }

    /// Linear filter on category and optional subcategory.
    pub fn search_by_category(&self, category: &str, subcategory: Option<&str>) -> Vec<&KnowledgeEntry> {
        self.entries
            .values()
            .filter(|e| e.category == category)
            .filter(|e| subcategory.is_none() || e.subcategory.as_deref() == subcategory)
            .collect()
    }

    /// Case-insensitive text search.
    ///
    /// Score is 0.5 for a title hit, 0.3 for a content hit and 0.2 if any tag
    /// contains the query. Zero-score entries are dropped.
    pub fn search_by_text(&self, query: &str) -> Vec<(&KnowledgeEntry, f64)> {
        let query = query.to_lowercase();
        if query.trim().is_empty() {
            return Vec::new();
        }

        let mut results: Vec<(&KnowledgeEntry, f64)> = self
            .entries
            .values()
            .filter_map(|entry| {
                let mut score = 0.0;
                if entry.title.to_lowercase().contains(&query) {
                    score += TITLE_MATCH_SCORE;
                }
                if entry.content.to_lowercase().contains(&query) {
                    score += CONTENT_MATCH_SCORE;
                }
                if entry.tags.iter().any(|t| t.to_lowercase().contains(&query)) {
                    score += TAG_MATCH_SCORE;
                }
                (score > 0.0).then_some((entry, score))
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    pub fn get_related(&self, id: &str) -> Vec<&KnowledgeEntry> {
        self.entries
            .get(id)
            .map(|entry| {
                entry
                    .related_entries
                    .iter()
                    .filter_map(|peer| self.entries.get(peer))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Link two entries in both directions. `false` if either is missing or
    /// both ids are the same.
    pub fn add_relationship(&mut self, a: &str, b: &str) -> bool {
        if a == b || !self.entries.contains_key(a) || !self.entries.contains_key(b) {
            return false;
        }
        let now = Utc::now();
        for (from, to) in [(a, b), (b, a)] {
            if let Some(entry) = self.entries.get_mut(from) {
                if entry.related_entries.insert(to.to_string()) {
                    entry.updated_at = now;
                }
            }
        }
        self.debug_verify();
        true
    }

    /// Unlink two entries in both directions. `false` if either is missing.
    pub fn remove_relationship(&mut self, a: &str, b: &str) -> bool {
        if !self.entries.contains_key(a) || !self.entries.contains_key(b) {
            return false;
        }
        let now = Utc::now();
        for (from, to) in [(a, b), (b, a)] {
            if let Some(entry) = self.entries.get_mut(from) {
                if entry.related_entries.remove(to) {
                    entry.updated_at = now;
                }
            }
        }
        true
    }

    pub fn categories(&self) -> &CategoryMap {
        &self.categories
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tag_index
    }

    pub fn entries_by_source(
        &self,
        source_type: SourceType,
        source_reference: Option<&str>,
    ) -> Vec<&KnowledgeEntry> {
        self.entries
            .values()
            .filter(|e| e.source_type == source_type)
            .filter(|e| source_reference.is_none() || e.source_reference.as_deref() == source_reference)
            .collect()
    }

    /// First entry whose metadata holds `key == value`.
    pub fn find_by_metadata(&self, key: &str, value: &serde_json::Value) -> Option<&KnowledgeEntry> {
        self.entries
            .values()
            .find(|e| e.metadata.get(key) == Some(value))
    }

    /// Count a retrieval. Does not bump `updated_at`.
    pub fn touch(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.usage.usage_count = entry.usage.usage_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Record whether applying an entry worked out.
    pub fn record_outcome(&mut self, id: &str, success: bool) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                if success {
                    entry.usage.success_count = entry.usage.success_count.saturating_add(1);
                } else {
                    entry.usage.failure_count = entry.usage.failure_count.saturating_add(1);
                }
                true
            }
            None => false,
        }
    }

    /// Check every index against the entries.
    pub fn verify_indices(&self) -> Result<()> {
        let rebuilt = rebuild_tag_index(&self.entries);
        if rebuilt != self.tag_index {
            return Err(Error::IndexInconsistency(
                "tag index does not match entry tags".into(),
            ));
        }

        for entry in self.entries.values() {
            let Some(subs) = self.categories.get(&entry.category) else {
                return Err(Error::IndexInconsistency(format!(
                    "category '{}' of entry {} missing from category map",
                    entry.category, entry.id
                )));
            };
            if let Some(sub) = &entry.subcategory {
                if !subs.contains(sub) {
                    return Err(Error::IndexInconsistency(format!(
                        "subcategory '{}/{}' of entry {} missing from category map",
                        entry.category, sub, entry.id
                    )));
                }
            }
            for peer in &entry.related_entries {
                let symmetric = self
                    .entries
                    .get(peer)
                    .is_some_and(|p| p.related_entries.contains(&entry.id));
                if !symmetric {
                    return Err(Error::IndexInconsistency(format!(
                        "relationship {} -> {} is dangling or one-sided",
                        entry.id, peer
                    )));
                }
            }
        }

        Ok(())
    }

    /// Write the three store documents into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        write_json_atomic(&dir.join(ENTRIES_FILE), &self.entries)?;
        write_json_atomic(&dir.join(CATEGORIES_FILE), &self.categories)?;
        write_json_atomic(&dir.join(TAG_INDEX_FILE), &self.tag_index)?;

        tracing::info!(
            entries = self.entries.len(),
            path = %dir.display(),
            "Knowledge store saved"
        );
        Ok(())
    }

    /// Load a store from `dir`.
    ///
    /// Missing files yield empty parts. Indices are rebuilt from the entries
    /// and any disagreement with the persisted copy is repaired with a warning.
    pub fn load(dir: &Path) -> Result<Self> {
        let entries: BTreeMap<String, KnowledgeEntry> =
            read_json(&dir.join(ENTRIES_FILE))?.unwrap_or_default();
        let categories: CategoryMap = read_json(&dir.join(CATEGORIES_FILE))?.unwrap_or_default();
        let tag_index: TagIndex = read_json(&dir.join(TAG_INDEX_FILE))?.unwrap_or_default();

        if let Some((key, entry)) = entries.iter().find(|(key, entry)| **key != entry.id) {
            return Err(Error::corrupt(
                dir.join(ENTRIES_FILE),
                format!("entry keyed '{}' carries id '{}'", key, entry.id),
            ));
        }

        let mut store = Self {
            entries,
            categories,
            tag_index,
        };
        store.repair_indices();

        tracing::info!(
            entries = store.entries.len(),
            path = %dir.display(),
            "Knowledge store loaded"
        );
        Ok(store)
    }

    /// Load a store, starting empty if the files are unreadable.
    pub fn load_or_default(dir: &Path) -> Self {
        match Self::load(dir) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "Failed to load knowledge store, starting empty"
                );
                Self::new()
            }
        }
    }

    fn repair_indices(&mut self) {
        let rebuilt = rebuild_tag_index(&self.entries);
        if rebuilt != self.tag_index {
            tracing::warn!("Persisted tag index disagrees with entries, using rebuilt index");
            self.tag_index = rebuilt;
        }

        let pairs: Vec<(String, Option<String>)> = self
            .entries
            .values()
            .map(|e| (e.category.clone(), e.subcategory.clone()))
            .collect();
        for (category, subcategory) in pairs {
            self.index_category(&category, subcategory.as_deref());
        }

        let ids: BTreeSet<String> = self.entries.keys().cloned().collect();
        let mut dangling = 0usize;
        for entry in self.entries.values_mut() {
            let before = entry.related_entries.len();
            entry.related_entries.retain(|peer| ids.contains(peer) && *peer != entry.id);
            dangling += before - entry.related_entries.len();
        }
        let edges: Vec<(String, String)> = self
            .entries
            .values()
            .flat_map(|e| e.related_entries.iter().map(|p| (p.clone(), e.id.clone())))
            .collect();
        for (peer, id) in edges {
            if let Some(entry) = self.entries.get_mut(&peer) {
                entry.related_entries.insert(id);
            }
        }
        if dangling > 0 {
            tracing::warn!(removed = dangling, "Dropped dangling relationships on load");
        }
    }

    fn index_category(&mut self, category: &str, subcategory: Option<&str>) {
        let subs = self.categories.entry(category.to_string()).or_default();
        if let Some(sub) = subcategory {
            subs.insert(sub.to_string());
        }
    }

    fn unindex_tag(&mut self, tag: &str, id: &str) {
        if let Some(posting) = self.tag_index.get_mut(tag) {
            posting.remove(id);
            if posting.is_empty() {
                self.tag_index.remove(tag);
            }
        }
    }

    fn debug_verify(&self) {
        #[cfg(debug_assertions)]
        if let Err(e) = self.verify_indices() {
            panic!("knowledge store invariant violated: {e}");
        }
    }
}

fn rebuild_tag_index(entries: &BTreeMap<String, KnowledgeEntry>) -> TagIndex {
    let mut index = TagIndex::new();
    for entry in entries.values() {
        for tag in &entry.tags {
            index.entry(tag.clone()).or_default().insert(entry.id.clone());
        }
    }
    index
}

impl MemoryStore for KnowledgeStore {
    type Record = KnowledgeEntry;

    fn get(&self, id: &str) -> Option<&KnowledgeEntry> {
        self.entries.get(id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.categories.clear();
        self.tag_index.clear();
    }
}

impl SearchableStore for KnowledgeStore {
    fn search_items(&self) -> Vec<SearchItem> {
        self.entries.values().map(SearchItem::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(title: &str, content: &str, tags: &[&str]) -> NewEntry {
        NewEntry::new(title, content, "laravel").with_tags(tags.iter().copied())
    }

    fn assert_tags_indexed(store: &KnowledgeStore) {
        for e in store.all() {
            for tag in &e.tags {
                assert!(store.tag_index()[tag].contains(&e.id), "{tag} missing {}", e.id);
            }
        }
    }

    #[test]
    fn test_add_indexes_tags_and_category() {
        let mut store = KnowledgeStore::new();
        let id = store.add(entry("Testing", "Use Pest", &["laravel", "testing"]).with_subcategory("pest"));

        let e = store.get(&id).unwrap();
        assert_eq!(e.quality_score, DEFAULT_QUALITY_SCORE);
        assert_eq!(e.version, ENTRY_VERSION);
        assert_eq!(e.created_at, e.updated_at);
        assert!(store.categories()["laravel"].contains("pest"));
        assert_tags_indexed(&store);
        assert!(store.verify_indices().is_ok());
    }

    #[test]
    fn test_search_by_tags_union_and_intersection() {
        let mut store = KnowledgeStore::new();
        let id = store.add(entry("Feature tests", "Pest feature tests", &["laravel", "testing"]));

        let any = store.search_by_tags(&["testing", "database"], false);
        assert_eq!(any.len(), 1);
        assert_eq!(any[0].id, id);

        let all = store.search_by_tags(&["testing", "database"], true);
        assert!(all.is_empty());

        let both = store.search_by_tags(&["testing", "laravel"], true);
        assert_eq!(both.len(), 1);

        let none: [&str; 0] = [];
        assert!(store.search_by_tags(&none, false).is_empty());
    }

    #[test]
    fn test_title_only_text_match_scores_half() {
        let mut store = KnowledgeStore::new();
        store.add(entry("Eloquent Relationships", "hasMany and belongsTo", &["orm"]));

        let results = store.search_by_text("eloquent");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, 0.5);
    }

    #[test]
    fn test_text_search_scoring_and_order() {
        let mut store = KnowledgeStore::new();
        store.add(entry("Queues", "Dispatch jobs to queues", &["queues"]));
        store.add(entry("Horizon", "Monitor queues with Horizon", &[]));
        store.add(entry("Routing", "Define routes", &[]));

        let results = store.search_by_text("QUEUES");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.title, "Queues");
        assert!((results[0].1 - 1.0).abs() < 1e-9);
        assert!((results[1].1 - 0.3).abs() < 1e-9);
        assert!(store.search_by_text("").is_empty());
    }

    #[test]
    fn test_update_repairs_tag_index() {
        let mut store = KnowledgeStore::new();
        let id = store.add(entry("Caching", "Use Redis", &["cache", "redis"]));
        let before = store.get(&id).unwrap().updated_at;

        assert!(store.update(&id, EntryPatch::default().tags(["cache", "performance"])));
        assert!(!store.tag_index().contains_key("redis"));
        assert!(store.tag_index()["performance"].contains(&id));
        assert!(store.get(&id).unwrap().updated_at >= before);
        assert_tags_indexed(&store);

        assert!(store.update(
            &id,
            EntryPatch::default().category("infrastructure").subcategory(Some("redis".into()))
        ));
        assert!(store.categories()["infrastructure"].contains("redis"));
        assert!(store.verify_indices().is_ok());
    }

    #[test]
    fn test_content_update_drops_compression_record() {
        use crate::types::{CompressionInfo, CompressionLevel, ContentKind, OriginalVersion};

        let mut store = KnowledgeStore::new();
        let id = store.add(entry("Providers", "short form", &["laravel"]));
        let now = Utc::now();
        let compressed = EntryPatch {
            compression: Some(Some(CompressionInfo {
                kind: ContentKind::Text,
                level: CompressionLevel::Balanced,
                original_size: 40,
                compressed_size: 10,
                ratio: 0.25,
                timestamp: now,
                decompressed_at: None,
            })),
            original_version: Some(Some(OriginalVersion {
                content: "the long original form of this entry text".into(),
                size: 40,
                timestamp: now,
            })),
            ..Default::default()
        };
        assert!(store.update(&id, compressed));
        assert!(store.get(&id).unwrap().is_compressed());

        assert!(store.update(&id, EntryPatch::default().title("Service providers")));
        assert!(store.get(&id).unwrap().is_compressed());

        assert!(store.update(&id, EntryPatch::default().content("rewritten")));
        let e = store.get(&id).unwrap();
        assert_eq!(e.content, "rewritten");
        assert!(!e.is_compressed());
        assert!(e.original_version.is_none());
        assert!(store.verify_indices().is_ok());
    }

    #[test]
    fn test_update_unknown_id() {
        let mut store = KnowledgeStore::new();
        assert!(!store.update("missing", EntryPatch::default().title("x")));
    }

    #[test]
    fn test_relationship_symmetry() {
        let mut store = KnowledgeStore::new();
        let a = store.add(entry("A", "a", &[]));
        let b = store.add(entry("B", "b", &[]));

        assert!(store.add_relationship(&a, &b));
        assert!(store.get(&a).unwrap().related_entries.contains(&b));
        assert!(store.get(&b).unwrap().related_entries.contains(&a));
        assert_eq!(store.get_related(&a)[0].id, b);

        assert!(!store.add_relationship(&a, "missing"));
        assert!(!store.add_relationship(&a, &a));

        assert!(store.remove_relationship(&b, &a));
        assert!(store.get(&a).unwrap().related_entries.is_empty());
        assert!(store.get(&b).unwrap().related_entries.is_empty());
    }

    #[test]
    fn test_delete_removes_dangling_edges() {
        let mut store = KnowledgeStore::new();
        let keep = store.add(entry("Keep", "k", &["shared"]));
        let gone = store.add(entry("Gone", "g", &["shared", "only"]));
        store.add_relationship(&keep, &gone);

        assert!(store.delete(&gone));
        assert!(!store.get(&keep).unwrap().related_entries.contains(&gone));
        assert!(!store.tag_index().contains_key("only"));
        assert_eq!(store.tag_index()["shared"].len(), 1);
        assert!(store.all().all(|e| !e.related_entries.contains(&gone)));
        assert!(!store.delete(&gone));
    }

    #[test]
    fn test_add_with_relations_is_symmetric() {
        let mut store = KnowledgeStore::new();
        let a = store.add(entry("A", "a", &[]));
        let mut input = entry("B", "b", &[]);
        input.related_entries = [a.clone(), "ghost".to_string()].into_iter().collect();
        let b = store.add(input);

        assert_eq!(store.get(&b).unwrap().related_entries.len(), 1);
        assert!(store.get(&a).unwrap().related_entries.contains(&b));
    }

    #[test]
    fn test_category_and_source_filters() {
        let mut store = KnowledgeStore::new();
        store.add(entry("Forms", "f", &[]).with_subcategory("filament"));
        store.add(entry("Tables", "t", &[]).with_subcategory("tables"));
        store.add(
            NewEntry::new("Fix", "c", "php").with_source(SourceType::ErrorCorrection, Some("s1".into())),
        );

        assert_eq!(store.search_by_category("laravel", None).len(), 2);
        assert_eq!(store.search_by_category("laravel", Some("tables")).len(), 1);
        assert_eq!(store.entries_by_source(SourceType::ErrorCorrection, None).len(), 1);
        assert!(store.entries_by_source(SourceType::ErrorCorrection, Some("s2")).is_empty());
    }

    #[test]
    fn test_usage_counters() {
        let mut store = KnowledgeStore::new();
        let id = store.add(entry("A", "a", &[]));
        assert!(store.touch(&id));
        assert!(store.record_outcome(&id, true));
        assert!(store.record_outcome(&id, false));
        assert!(!store.touch("missing"));

        let usage = store.get(&id).unwrap().usage;
        assert_eq!(usage.usage_count, 1);
        assert_eq!(usage.success_count, 1);
        assert_eq!(usage.failure_count, 1);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = KnowledgeStore::new();
        let a = store.add(entry("Eloquent", "Models", &["orm", "laravel"]).with_subcategory("models"));
        let b = store.add(entry("Migrations", "Schema", &["database"]));
        store.add_relationship(&a, &b);

        store.save(dir.path()).unwrap();
        let loaded = KnowledgeStore::load(dir.path()).unwrap();

        assert_eq!(loaded, store);
        assert!(dir.path().join(ENTRIES_FILE).exists());
        assert!(dir.path().join(CATEGORIES_FILE).exists());
        assert!(dir.path().join(TAG_INDEX_FILE).exists());
    }

    #[test]
    fn test_load_repairs_stale_tag_index() {
        let dir = tempdir().unwrap();
        let mut store = KnowledgeStore::new();
        let id = store.add(entry("A", "a", &["alpha"]));
        store.save(dir.path()).unwrap();

        let mut stale = TagIndex::new();
        stale.entry("beta".to_string()).or_default().insert(id.clone());
        write_json_atomic(&dir.path().join(TAG_INDEX_FILE), &stale).unwrap();

        let loaded = KnowledgeStore::load(dir.path()).unwrap();
        assert!(loaded.tag_index()["alpha"].contains(&id));
        assert!(!loaded.tag_index().contains_key("beta"));
    }

    #[test]
    fn test_load_corrupt_falls_back_to_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(ENTRIES_FILE), "[[[").unwrap();

        assert!(KnowledgeStore::load(dir.path()).unwrap_err().is_corrupt());
        assert!(KnowledgeStore::load_or_default(dir.path()).is_empty());
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let store = KnowledgeStore::load(&dir.path().join("nope")).unwrap();
        assert!(store.is_empty());
    }
}
