use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum PersonaError {
    // Network errors
    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    // Parse errors
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    ValidationError(String),

    // Model errors
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    // IO errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<wreq::Error> for PersonaError {
    fn from(err: wreq::Error) -> Self {
        if err.is_timeout() {
            PersonaError::Timeout(err.to_string())
        } else if err.is_connect() {
            PersonaError::NetworkError(format!("Connection failed: {}", err))
        } else {
            PersonaError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PersonaError {
    fn from(err: serde_json::Error) -> Self {
        PersonaError::InvalidJson(err.to_string())
    }
}

impl From<url::ParseError> for PersonaError {
    fn from(err: url::ParseError) -> Self {
        PersonaError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for PersonaError {
    fn from(err: std::io::Error) -> Self {
        PersonaError::IoError(err.to_string())
    }
}

/// Type alias for Result with PersonaError
pub type Result<T> = std::result::Result<T, PersonaError>;
