//! Error types for the logging subsystem

use thiserror::Error;

/// Errors raised while installing the global subscriber
#[derive(Debug, Clone, Error)]
pub enum LoggingError {
    /// A global subscriber was already set, or the subscriber refused to install
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// The level or filter directive could not be understood
    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::InitializationFailed("already set".to_string());
        assert_eq!(err.to_string(), "Failed to initialize logging: already set");

        let err = LoggingError::InvalidConfiguration("level 'loud'".to_string());
        assert_eq!(err.to_string(), "Invalid logging configuration: level 'loud'");
    }

    #[test]
    fn test_logging_error_is_error_trait() {
        let err = LoggingError::InitializationFailed("test".to_string());
        let _: &dyn std::error::Error = &err;
    }
}
