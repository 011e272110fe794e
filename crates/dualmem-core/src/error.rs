//! Error types for dualmem-core.
//!
//! Unknown ids are not errors here: lookups return `Option` and mutations
//! return `bool`. This type is reserved for I/O failures and broken invariants.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using dualmem-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for dualmem operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Persisted state that could not be parsed
    #[error("Corrupt store file {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    // An index references an entry that does not exist, or misses one that does
    #[error("Index inconsistency: {0}")]
    IndexInconsistency(String),
}

impl Error {
    /// Create a corrupt-file error
    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error came from unparseable persisted state
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_error_display() {
        let err = Error::corrupt("/tmp/entries.json", "expected value at line 1");
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("/tmp/entries.json"));
        assert!(err.to_string().contains("expected value"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(!err.is_corrupt());
        assert!(err.to_string().starts_with("IO error"));
    }
}
