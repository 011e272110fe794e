//! dualmem-core - storage layer for dualmem
//!
//! This crate holds the two stores and everything they share:
//!
//! - **memory**: the bounded working memory and the indexed knowledge store
//! - **types**: messages, knowledge entries, patches and search items
//! - **persist**: atomic JSON file persistence
//! - **error**: the core error type
//!
//! Nothing in here is async or locked. The SDK owns concurrency.

pub mod error;
pub mod memory;
pub mod persist;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use memory::{KnowledgeStore, MemoryStore, SearchableStore, SessionSnapshot, WorkingMemory};
pub use types::{
    EntryPatch, ItemSource, KnowledgeEntry, Message, NewEntry, Role, SearchItem, SourceType,
};
