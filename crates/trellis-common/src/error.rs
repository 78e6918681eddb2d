//! Error types for Trellis.

use crate::block::BlockId;
use thiserror::Error;

/// Result type alias using TrellisError.
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Errors that can occur in Trellis operations.
#[derive(Debug, Error)]
pub enum TrellisError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Block storage errors
    #[error("Block not found: {block_id}")]
    BlockNotFound { block_id: BlockId },

    #[error("Block corrupted: {block_id}, reason: {reason}")]
    BlockCorrupted { block_id: BlockId, reason: String },

    #[error("Block size mismatch: expected {expected}, got {actual}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    #[error("Block manager closed: {0}")]
    Closed(String),

    #[error("Bracket violation: {0}")]
    BracketViolation(String),

    // Record and tree errors
    #[error("Record length mismatch: expected {expected}, got {actual}")]
    RecordLength { expected: usize, actual: usize },

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

impl TrellisError {
    /// Shorthand for an invalid construction parameter.
    pub fn invalid_parameter(name: &str, value: impl ToString) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: TrellisError = io_err.into();
        assert!(matches!(err, TrellisError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_block_not_found_display() {
        let err = TrellisError::BlockNotFound {
            block_id: BlockId(42),
        };
        assert_eq!(err.to_string(), "Block not found: 42");
    }

    #[test]
    fn test_block_corrupted_display() {
        let err = TrellisError::BlockCorrupted {
            block_id: BlockId(7),
            reason: "bad header".to_string(),
        };
        assert_eq!(err.to_string(), "Block corrupted: 7, reason: bad header");
    }

    #[test]
    fn test_block_size_mismatch_display() {
        let err = TrellisError::BlockSizeMismatch {
            expected: 32,
            actual: 16,
        };
        assert_eq!(err.to_string(), "Block size mismatch: expected 32, got 16");
    }

    #[test]
    fn test_record_length_display() {
        let err = TrellisError::RecordLength {
            expected: 8,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Record length mismatch: expected 8, got 3");
    }

    #[test]
    fn test_tree_errors_display() {
        let err = TrellisError::TreeCorrupted("keys out of order".to_string());
        assert_eq!(err.to_string(), "B+ tree corrupted: keys out of order");

        let err = TrellisError::BracketViolation("nested update".to_string());
        assert_eq!(err.to_string(), "Bracket violation: nested update");

        let err = TrellisError::Closed("mem".to_string());
        assert_eq!(err.to_string(), "Block manager closed: mem");
    }

    #[test]
    fn test_config_errors_display() {
        let err = TrellisError::ConfigError("cache_pages must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: cache_pages must be positive"
        );

        let err = TrellisError::invalid_parameter("order", 1);
        assert_eq!(err.to_string(), "Invalid parameter: order = 1");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TrellisError::TreeCorrupted("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TrellisError>();
    }
}
