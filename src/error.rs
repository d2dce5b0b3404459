use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the memora core
#[derive(Error, Debug)]
pub enum MemoraError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Item not found
    #[error("Item not found: {id}")]
    ItemNotFound { id: String },

    /// Context not found
    #[error("Context not found: {id}")]
    ContextNotFound { id: String },

    /// Media guardrail rejection (item exceeds configured limits)
    #[error("Media rejected: {0}")]
    MediaRejected(String),

    /// Ingestion errors (queue closed, worker failure)
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// Context extraction payload failed taxonomy validation
    #[error("Invalid context payload: {0}")]
    InvalidContext(String),

    /// Indexing errors (vector/keyword index writes)
    #[error("Index error: {0}")]
    Index(String),

    /// Retrieval errors
    #[error("Search error: {0}")]
    Search(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for memora operations
pub type Result<T> = std::result::Result<T, MemoraError>;
