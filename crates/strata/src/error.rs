//! Error types for the host-facing engine

use std::path::PathBuf;
use strata_graph::GraphError;
use strata_memory::MemoryError;
use thiserror::Error;

/// Result type for engine operations
pub type StrataResult<T> = Result<T, StrataError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum StrataError {
    /// Store, index, or conflict failure
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Knowledge graph or reasoning failure
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Rules file could not be written
    #[error("rules file {} failed: {source}", .path.display())]
    RulesFile {
        /// File being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Operation parameters were rejected
    #[error("invalid parameters for '{operation}': {message}")]
    InvalidParams {
        /// Operation name
        operation: String,
        /// What was wrong
        message: String,
    },
}

impl StrataError {
    /// Create an invalid-parameters error
    pub fn invalid_params(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a rules-file error
    pub fn rules_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::RulesFile {
            path: path.into(),
            source,
        }
    }
}
