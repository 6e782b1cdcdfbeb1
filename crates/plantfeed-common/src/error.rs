//! Error types shared across plantfeed crates

use thiserror::Error;

/// Result type alias for plantfeed-common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid {kind}: '{value}'")]
    InvalidVariant { kind: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CommonError {
    pub fn invalid_variant(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidVariant {
            kind,
            value: value.into(),
        }
    }
}
