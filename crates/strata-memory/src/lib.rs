//! # Strata Memory
//!
//! Four-level hierarchical memory for conversational agents:
//!
//! ```text
//! Theme      named cluster of facts sharing an entity
//!   └─ Semantic   typed, confidence-scored fact
//!        └─ Episode    summary of a block of utterances
//!             └─ Original   one raw utterance
//! ```
//!
//! Around the hierarchy sit:
//!
//! - [`MemoryStore`]: persistence over any [`Memory`] key/value backend, with
//!   all-or-nothing [`StoreTransaction`]s
//! - [`MemoryIndex`]: cosine similarity over pluggable embeddings, with
//!   keyword-overlap fallback
//! - [`ForgettingEngine`]: exponential decay scoring and archive/delete policy
//! - [`ConflictDetector`]: factual, preference, and temporal conflict detection
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_memory::{
//!     FactType, InMemoryStorage, IndexOptions, MemoryIndex, MemoryStore, SemanticMemory,
//! };
//!
//! # async fn example() -> strata_memory::MemoryResult<()> {
//! let store = Arc::new(MemoryStore::new(Arc::new(InMemoryStorage::new()), "demo"));
//! let fact = SemanticMemory::new("User prefers dark mode", FactType::Preference);
//! store.save(&fact.into()).await?;
//!
//! let index = MemoryIndex::new(store.clone());
//! let hits = index.search("dark mode", &IndexOptions::new()).await?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conflict;
pub mod error;
pub mod forgetting;
pub mod index;
pub mod storage;
pub mod store;
pub mod text;
pub mod types;
pub mod vector;

pub use config::{
    ConflictConfig, ForgettingConfig, MemoryConfig, ReflectionConfig, RetrievalConfig, ThemeConfig,
};
pub use conflict::{Conflict, ConflictDetector, ConflictSeverity, ConflictType, Resolution};
pub use error::{MemoryError, MemoryResult};
pub use forgetting::{AtRiskMemory, ForgettingEngine, ForgettingReport, ForgettingStats};
pub use index::{IndexOptions, MemoryIndex, ScoredMemory};
pub use storage::{BatchOp, InMemoryStorage, Memory, MemoryQuery, MemoryValue};
pub use store::{MemoryStore, SearchOptions, StoreStats, StoreTransaction};
pub use types::{
    generate_id, AccessStats, BoundaryType, EpisodeMemory, FactType, MemoryLevel, MemoryRecord,
    OriginalMemory, SemanticMemory, SpeakerRole, StoredMemory, ThemeMemory, ValidityPeriod,
};
pub use vector::{cosine_similarity, Embedding, EmbeddingProvider, HashEmbeddingProvider};
