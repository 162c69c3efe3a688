//! Error types for the memory hierarchy
//!
//! "Not found" is never an error here: lookups return `Option`/empty `Vec`.
//! Errors are reserved for backend failures, undecodable records, and
//! embedding provider faults.

use thiserror::Error;

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Memory system errors
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Storage backend failure (I/O, corruption, lock poisoning)
    #[error("storage operation '{operation}' failed: {source}")]
    Storage {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored record or value could not be encoded/decoded
    #[error("serialization during '{operation}' failed: {source}")]
    Serialization {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    /// Input violated a hard constraint
    #[error("invalid {field}: {constraint} (got {value})")]
    Validation {
        field: String,
        constraint: String,
        value: String,
    },

    /// Embedding provider failure
    #[error("embedding provider '{provider}' failed: {message}")]
    Embedding { provider: String, message: String },

    /// A batched write could not be applied and was rolled back
    #[error("transaction aborted: {message}")]
    Transaction { message: String },
}

impl MemoryError {
    /// Create a storage error
    pub fn storage(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(operation: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            operation: operation.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Embedding {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = MemoryError::validation("embedding_dimensions", "dimensions must match", "3 vs 4");
        assert_eq!(
            err.to_string(),
            "invalid embedding_dimensions: dimensions must match (got 3 vs 4)"
        );

        let err = MemoryError::storage(
            "set",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(err.to_string().contains("'set'"));
        assert!(err.to_string().contains("disk full"));
    }
}
