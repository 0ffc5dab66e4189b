//! Common error types for Mouser

use thiserror::Error;

/// Common result type for Mouser operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types shared by the store, the rebalancing engines and the ingestor
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Experiment file does not carry the expected schema (never migrated silently)
    #[error("Schema mismatch: {0}")]
    Schema(String),

    /// Requested subject or group not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Target group (or every group) is at capacity
    #[error("Capacity exceeded: {reason}")]
    CapacityExceeded {
        /// Group that was full, if a specific group was targeted
        group_id: Option<i64>,
        reason: String,
    },

    /// Identifier already belongs to an active subject
    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// Scan device could not be opened
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Commit failed after retry
    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// Auto-sort committed what it could; listed subjects kept their prior group
    #[error("Incomplete sort: {} subject(s) not placed", skipped.len())]
    IncompleteSort { skipped: Vec<i64> },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a capacity failure on one group
    pub fn group_full(group_id: i64) -> Self {
        Error::CapacityExceeded {
            group_id: Some(group_id),
            reason: format!("group {} is full", group_id),
        }
    }

    /// Whether the error came from the store itself rather than from a rule check
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_sort_message_counts_skipped() {
        let err = Error::IncompleteSort { skipped: vec![3, 7] };
        assert_eq!(err.to_string(), "Incomplete sort: 2 subject(s) not placed");
    }

    #[test]
    fn test_store_failure_classification() {
        assert!(Error::Database(sqlx::Error::PoolClosed).is_store_failure());
        assert!(!Error::group_full(1).is_store_failure());
        assert!(!Error::DuplicateIdentifier("A1".into()).is_store_failure());
    }
}
