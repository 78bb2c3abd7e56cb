use thiserror::Error;

/// Failures surfaced by training, loading and prediction
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or missing record fields
    #[error("Invalid input ({}): {message}", .fields.join(", "))]
    InvalidInput {
        fields: Vec<String>,
        message: String,
    },

    /// Post-transform invariant violated
    #[error("Schema error: {0}")]
    Schema(String),

    /// Unreadable or malformed training dataset
    #[error("Data load error: {0}")]
    DataLoad(String),

    /// Model artifact absent at the resolved path
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Model artifact present but corrupt or incompatible
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Artifact write failure
    #[error("Persist error: {0}")]
    Persist(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fit or evaluation failure
    #[error("Training error: {0}")]
    Training(String),
}

impl AppError {
    /// Field names carried by an `InvalidInput` error
    pub fn invalid_fields(&self) -> &[String] {
        match self {
            AppError::InvalidInput { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::InvalidInput { .. } => "INVALID_INPUT",
            AppError::Schema(_) => "SCHEMA_ERROR",
            AppError::DataLoad(_) => "DATA_LOAD_ERROR",
            AppError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            AppError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            AppError::Persist(_) => "PERSIST_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Training(_) => "TRAINING_ERROR",
        }
    }
}

/// Malformed JSON prediction input
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput {
            fields: Vec::new(),
            message: err.to_string(),
        }
    }
}

/// YAML rendering or parsing failure
impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Out-of-range configuration values
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Config source or parse failure
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::ModelNotFound("test".to_string()).error_code(),
            "MODEL_NOT_FOUND"
        );
        assert_eq!(
            AppError::Persist("disk full".to_string()).error_code(),
            "PERSIST_ERROR"
        );
        assert_eq!(AppError::Schema("x".to_string()).error_code(), "SCHEMA_ERROR");
    }

    #[test]
    fn test_invalid_input_names_fields() {
        let err = AppError::InvalidInput {
            fields: vec!["src_bytes".to_string(), "hour".to_string()],
            message: "must be non-negative".to_string(),
        };

        assert_eq!(err.invalid_fields(), &["src_bytes", "hour"]);
        let rendered = err.to_string();
        assert!(rendered.contains("src_bytes, hour"));
        assert!(rendered.contains("must be non-negative"));
    }

    #[test]
    fn test_other_errors_carry_no_fields() {
        assert!(AppError::DataLoad("empty".to_string())
            .invalid_fields()
            .is_empty());
    }
}
