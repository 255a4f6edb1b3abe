use std::path::PathBuf;
use thiserror::Error;

/// Main error type for docsift
#[derive(Error, Debug)]
pub enum SiftError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

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

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Unusable or inconsistent cache entries
    #[error("Cache error: {0}")]
    Cache(String),

    /// Embedding model errors (load or inference)
    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Vector index errors
    #[error("Vector index error: {0}")]
    Index(#[from] crate::embedding::VectorIndexError),

    /// Hybrid search errors
    #[error("Search error: {0}")]
    Search(#[from] crate::retrieval::SearchError),

    /// Cross-encoder errors
    #[error("Rerank error: {0}")]
    Rerank(#[from] crate::retrieval::RerankError),

    /// Text extraction errors
    #[error("Extraction error: {0}")]
    Extraction(#[from] crate::extract::ExtractError),

    /// Language model errors
    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    /// Session related errors
    #[error("Session error: {0}")]
    Session(String),

    /// Session not found
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SiftError {
    /// Shorthand for wrapping an `std::io::Error` with context
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    /// Shorthand for wrapping a `serde_json::Error` with context
    pub fn json(source: serde_json::Error, context: impl Into<String>) -> Self {
        Self::Json {
            source,
            context: context.into(),
        }
    }
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

/// Result type for docsift operations
pub type Result<T> = std::result::Result<T, SiftError>;
