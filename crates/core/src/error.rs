//! Error types for Aide.
//!
//! This module defines a unified error enum that covers all error categories
//! in the workspace: configuration, I/O, the assistant API, the embedding
//! index, tool dispatch, terminals and instruction rendering.

use thiserror::Error;

/// Unified error type for Aide.
///
/// All fallible library functions return `Result<T, AppError>`.
/// Per-file and per-tool-call failures are converted into values at their
/// boundary; only setup and transport failures travel as `AppError`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Assistant API and streaming errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding index errors
    #[error("Index error: {0}")]
    Index(String),

    /// Tool argument and execution errors
    #[error("Tool error: {0}")]
    Tool(String),

    /// Terminal process errors
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Instruction template errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let err = AppError::Tool("missing path".to_string());
        assert_eq!(err.to_string(), "Tool error: missing path");

        let err = AppError::Other("plain".to_string());
        assert_eq!(err.to_string(), "plain");
    }

    #[test]
    fn test_from_serde_json() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AppError = parse.unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
