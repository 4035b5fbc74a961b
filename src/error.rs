use thiserror::Error;

/// Errors surfaced to callers of the correlation subsystem.
///
/// Only identifier parsing can fail hard. Duplicate insertions, unmatched
/// responses and misbehaving eviction callbacks are logged, never returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("Malformed correlation id: expected {expected} bytes, got {actual}")]
    MalformedIdentifier { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_identifier_message() {
        let err = CorrelationError::MalformedIdentifier {
            expected: 16,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Malformed correlation id: expected 16 bytes, got 3"
        );
    }

    #[test]
    fn test_config_error_wraps_into_app_error() {
        let err: AppError = ConfigError::Invalid("ttl must be > 0".to_string()).into();
        assert!(matches!(err, AppError::Config(ConfigError::Invalid(_))));
        assert!(err.to_string().contains("ttl must be > 0"));
    }
}
