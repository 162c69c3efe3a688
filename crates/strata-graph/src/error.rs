//! Error types for the knowledge graph and reasoning engine

use strata_memory::MemoryError;
use thiserror::Error;

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Graph and reasoning errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// Failure reading the memory store or index
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// An inference rule was rejected on registration
    #[error("invalid inference rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },
}

impl GraphError {
    /// Create an invalid-rule error
    pub fn invalid_rule(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
