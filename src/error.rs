//! Error types for context assembly and streaming

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors surfaced to the caller of a turn
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// A precondition lookup failed (chat session, message, specialization)
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model call failed: {0}")]
    Model(String),

    #[error("Memory retrieval failed: {0}")]
    Retrieval(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The turn was cancelled before it committed to further work
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ContextError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContextError::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ContextError::Cancelled)
    }
}

impl From<reqwest::Error> for ContextError {
    fn from(e: reqwest::Error) -> Self {
        ContextError::Model(e.to_string())
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(e: serde_json::Error) -> Self {
        ContextError::Internal(format!("JSON error: {}", e))
    }
}

impl From<::config::ConfigError> for ContextError {
    fn from(e: ::config::ConfigError) -> Self {
        ContextError::Configuration(e.to_string())
    }
}
