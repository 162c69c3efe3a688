//! # Strata - Hierarchical Memory for Conversational Agents
//!
//! **Strata** keeps what an agent hears in four levels:
//!
//! - **Original**: the verbatim utterance
//! - **Episode**: a short summary of a stretch of conversation
//! - **Semantic**: a typed fact with confidence, entities, and validity
//! - **Theme**: a named cluster of related facts
//!
//! On top of the hierarchy it runs conflict detection, retention decay,
//! a knowledge graph of entities, and multi-hop reasoning. Hosts drive
//! everything through the ten operations on [`MemoryEngine`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = MemoryEngine::builder()
//!         .with_config(MemoryConfig::new("my-agent"))
//!         .with_rules_file("rules.md")
//!         .build()
//!         .await?;
//!
//!     engine
//!         .remember(RememberParams::new("User prefers Postgres for analytics"))
//!         .await?;
//!
//!     let recall = engine.recall(RecallParams::new("postgres")).await?;
//!     println!("{}", recall.answer);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │               Strata                 │
//! │   (MemoryEngine - host operations)   │
//! └──────────────────┬───────────────────┘
//!                    │
//!          ┌─────────┴─────────┐
//!          │                   │
//!  ┌───────▼───────┐   ┌───────▼──────┐
//!  │ strata-memory │◄──│ strata-graph │
//!  └───────────────┘   └──────────────┘
//! ```
//!
//! ## Configuration
//!
//! [`load_config`] layers a config file and `STRATA__*` environment
//! variables over the defaults.

#![doc(html_root_url = "https://docs.rs/strata/0.1.0")]
#![warn(missing_docs)]

pub mod distill;
pub mod engine;
pub mod error;
pub mod evolve;
pub mod scheduler;
pub mod settings;
pub mod tools;

// Re-export sub-crates
pub use strata_graph as graph;
pub use strata_memory as memory;

pub use engine::{MemoryEngine, MemoryEngineBuilder};
pub use error::{StrataError, StrataResult};
pub use evolve::RulesFile;
pub use scheduler::{ScheduledFn, ScheduledTask, Scheduler, TokioScheduler};
pub use settings::{load_config, ENV_PREFIX};
pub use tools::{
    ConsolidateResult, EvolveParams, EvolveResult, ForgetParams, ForgetResult, GraphOutput,
    GraphQuery, IntrospectParams, IntrospectResult, Operation, ReasonParams, RecallParams,
    RecallResult, ReflectResult, RelationView, RememberParams, RememberResult, RuleProposal,
    StatusResult, ThemeSummary, ToolOutput, ToolResponse,
};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::engine::{MemoryEngine, MemoryEngineBuilder};
    pub use crate::error::{StrataError, StrataResult};
    pub use crate::scheduler::{Scheduler, TokioScheduler};
    pub use crate::tools::{
        EvolveParams, ForgetParams, GraphQuery, IntrospectParams, ReasonParams, RecallParams,
        RememberParams, ToolOutput,
    };

    pub use crate::memory::{
        Conflict, ConflictSeverity, ConflictType, FactType, InMemoryStorage, Memory, MemoryConfig,
        MemoryLevel, Resolution,
    };

    pub use crate::graph::{Entity, InferenceRule, RelationType};
}
