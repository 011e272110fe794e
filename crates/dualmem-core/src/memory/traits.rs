//! Store traits defining the interface shared by both memories.

use crate::types::SearchItem;

/// Core trait for memory storage.
///
/// Implemented by the volatile working memory and the durable knowledge
/// store so that callers never need to know which backing shape they hold.
pub trait MemoryStore: Send + Sync {
    /// Record type held by the store.
    type Record;

    /// Retrieve a record by ID.
    fn get(&self, id: &str) -> Option<&Self::Record>;

    /// Number of records held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record.
    fn clear(&mut self);
}

/// A store whose records can take part in hybrid search.
pub trait SearchableStore: MemoryStore {
    /// Project every record into a uniform search item.
    fn search_items(&self) -> Vec<SearchItem>;
}
