//! The two memories.
//!
//! ```text
//! ┌──────────────────────┐   promotion   ┌──────────────────────────┐
//! │   Working memory     │──────────────▶│     Knowledge store      │
//! │  bounded FIFO of     │               │  entries + tag index +   │
//! │  session messages    │               │  category map (durable)  │
//! └──────────────────────┘               └──────────────────────────┘
//!            │                                        │
//!            └──────────── SearchableStore ───────────┘
//! ```
//!
//! Both sides implement [`MemoryStore`] and [`SearchableStore`], which is all
//! the hybrid search layer needs to see.

mod knowledge;
mod traits;
mod working;

pub use knowledge::*;
pub use traits::*;
pub use working::*;
