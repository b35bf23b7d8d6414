use thiserror::Error;

/// Top-level error type for the Brain system.
///
/// Infrastructure failures only. Business outcomes such as a blocked or
/// skipped action are carried as data by the engine and never surface here.
/// Subsystem crates implement `From<SubsystemError> for BrainError` so the
/// `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BrainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for BrainError {
    fn from(err: toml::de::Error) -> Self {
        BrainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for BrainError {
    fn from(err: toml::ser::Error) -> Self {
        BrainError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BrainError {
    fn from(err: serde_json::Error) -> Self {
        BrainError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Brain operations.
pub type Result<T> = std::result::Result<T, BrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(BrainError, &str)> = vec![
            (
                BrainError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                BrainError::Catalog("unreachable".to_string()),
                "Catalog error: unreachable",
            ),
            (
                BrainError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                BrainError::Network("connection reset".to_string()),
                "Network error: connection reset",
            ),
            (
                BrainError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BrainError = io_err.into();
        assert!(matches!(err, BrainError::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: BrainError = err.unwrap_err().into();
        assert!(matches!(err, BrainError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: BrainError = err.unwrap_err().into();
        assert!(matches!(err, BrainError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
