//! Error types for the HAPI client pipeline.

use thiserror::Error;

/// Result type alias using HapiError.
pub type HapiResult<T> = Result<T, HapiError>;

/// Primary error type for HAPI operations.
#[derive(Debug, Error)]
pub enum HapiError {
    // === Transport Errors ===
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    // === Metadata Errors ===
    #[error("Invalid metadata: {0}")]
    Metadata(String),

    #[error("Dataset not found: {0}")]
    UnknownDataset(String),

    #[error("Parameter not found: {0}")]
    UnknownParameter(String),

    #[error("Parameter '{0}' has no declared length; required for binary format")]
    MissingLength(String),

    #[error("Parameter order not honoured: {0}")]
    ParameterOrder(String),

    // === Data Errors ===
    #[error("Failed to decode data: {0}")]
    Decode(String),

    #[error("Chunk {index} ({start} to {stop}) failed: {source}")]
    Chunk {
        index: usize,
        start: String,
        stop: String,
        #[source]
        source: Box<HapiError>,
    },

    // === Request Errors ===
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid option '{option}': {message}")]
    InvalidOption { option: String, message: String },

    // === Storage Errors ===
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HapiError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        HapiError::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_option(option: impl Into<String>, message: impl Into<String>) -> Self {
        HapiError::InvalidOption {
            option: option.into(),
            message: message.into(),
        }
    }

    /// True for errors raised before any network access (bad input).
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            HapiError::UnknownParameter(_)
                | HapiError::ParameterOrder(_)
                | HapiError::InvalidTime(_)
                | HapiError::InvalidOption { .. }
        )
    }
}
