//! dualmem SDK - the dual memory system
//!
//! This crate layers processing and orchestration over `dualmem-core`:
//!
//! - **memory** - compression, relevance scoring, hybrid search with a result
//!   cache, the promotion pipeline and operation telemetry
//! - **system** - [`MemorySystem`], the async orchestrator that owns both
//!   stores and exposes add/search/promote/store/save/load
//!
//! # Example
//!
//! ```rust,no_run
//! use dualmem_sdk::{MemorySystem, SDKConfig};
//! use dualmem_core::types::Role;
//!
//! async fn example() -> dualmem_sdk::SDKResult<()> {
//!     let memory = MemorySystem::load("memory".as_ref(), SDKConfig::default()).await?;
//!
//!     memory.add_message(Role::User, "How do I eager load relations?").await;
//!     let hits = memory.search("eager load", 5).await;
//!
//!     memory.save("memory".as_ref()).await?;
//!     Ok(())
//! }
//! ```

pub mod memory;
pub mod utils;

mod config;
mod error;
mod system;

// Re-export core crate
pub use dualmem_core as core;

// Re-export main SDK types
pub use config::{
    CompressionConfig, ConfigValidationError, PromotionConfig, SDKConfig, ScoringWeights,
    SearchConfig, WorkingConfig,
};
pub use error::{SDKError, SDKResult};
pub use system::{
    METADATA_FILE, MemorySystem, OptimizationReport, PERMANENT_DIR, Retrieved, SearchHit,
    SystemMetadata, SystemStats, TEMPORARY_DIR,
};

pub use memory::{
    Candidate, ConfidenceLevel, OperationEvent, OperationSink, OperationType, PromotionReport,
    QualityJudge, RecordingSink, SemanticSearch, TracingSink, Verdict,
};
