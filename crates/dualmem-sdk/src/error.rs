//! SDK Error Types
//!
//! Unknown ids are reported through `Option`/`bool` by the stores, so the
//! SDK only errors on bad configuration, storage failures and the judge.

use thiserror::Error;

/// SDK Result type alias
pub type SDKResult<T> = Result<T, SDKError>;

/// SDK errors
#[derive(Debug, Error)]
pub enum SDKError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Storage layer error
    #[error("store error: {0}")]
    Core(#[from] dualmem_core::Error),

    /// The quality judge could not be reached or failed
    #[error("quality judge unavailable: {message}")]
    JudgeUnavailable { message: String },

    /// The quality judge did not answer in time
    #[error("quality judge timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl SDKError {
    /// Create a judge-unavailable error
    pub fn judge_unavailable(message: impl Into<String>) -> Self {
        Self::JudgeUnavailable {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SDKError::judge_unavailable("no command configured");
        assert!(err.to_string().contains("no command configured"));
        assert!(!err.is_timeout());

        let err = SDKError::timeout(5000);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("5000"));
    }

    #[test]
    fn test_core_error_conversion() {
        let core = dualmem_core::Error::corrupt("entries.json", "bad");
        let err: SDKError = core.into();
        assert!(matches!(err, SDKError::Core(ref e) if e.is_corrupt()));
        assert!(err.to_string().contains("entries.json"));
    }
}
