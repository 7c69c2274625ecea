//! Error types for the filter stages.

pub use pqgate_core::error::Error as PqgateError;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Config parse error in {stage}: {message}")]
    ConfigParse { stage: &'static str, message: String },

    #[error("Validation error in {stage}: {message}")]
    Validation { stage: &'static str, message: String },

    #[error("Unknown filter: {0}")]
    UnknownFilter(String),
}

impl FilterError {
    pub fn parse(stage: &'static str, e: impl std::fmt::Display) -> Self {
        Self::ConfigParse {
            stage,
            message: e.to_string(),
        }
    }

    pub fn validation(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            stage,
            message: message.into(),
        }
    }
}

/// Result type for filter operations
pub type Result<T> = std::result::Result<T, FilterError>;

impl From<FilterError> for PqgateError {
    fn from(e: FilterError) -> Self {
        match e {
            FilterError::ConfigParse { .. } | FilterError::Validation { .. } => {
                PqgateError::Config(e.to_string())
            }
            FilterError::UnknownFilter(name) => PqgateError::Filter(format!("unknown filter {}", name)),
        }
    }
}
