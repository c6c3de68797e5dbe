//! Error types for dataset ingestion

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Everything that can go wrong between an upstream URL and a committed row.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Non-200 response, connection failure or timeout
    #[error("Transport error: {url}: {message}")]
    Transport { url: String, message: String },

    /// Payload did not have the expected JSON or CSV shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Store rejected a write, or a transaction could not be opened or finished
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Engine asked for a record the last parse did not produce
    #[error("Record position {position} out of range (page holds {count} records)")]
    OutOfRange { position: usize, count: usize },

    /// Missing dataset selector, bad locator or credentials, invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A concurrent load task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl IngestError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Decode(err.to_string())
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        IngestError::Decode(err.to_string())
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Persistence(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Task(err.to_string())
    }
}
