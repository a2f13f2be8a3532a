/// Centralized error types for symbol-rag using thiserror
///
/// Parse-level problems never surface through these types on the hot path (parsers
/// degrade to empty results). They exist for task boundaries, storage and caller
/// contract violations.
use thiserror::Error;

/// Main error type for the indexing system
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Vector database error: {0}")]
    VectorDb(#[from] VectorDbError),

    #[error("Vector cache error: {0}")]
    VectorCache(#[from] CacheError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors related to index files
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed index file '{path}': {reason}")]
    MalformedIndex { path: String, reason: String },
}

/// Errors related to vector database operations
#[derive(Error, Debug)]
pub enum VectorDbError {
    #[error("Failed to open vector database at '{path}': {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Vector database at '{0}' is locked by another process")]
    Locked(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Table '{0}' is missing column '{1}'")]
    MissingColumn(String, String),

    #[error("File chunk {0} not found")]
    FileChunkNotFound(u64),

    #[error("top_k must be greater than 0")]
    InvalidTopK,
}

/// Errors related to the in-memory vector cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector count {vectors} does not match range count {ranges}")]
    RangeCountMismatch { vectors: usize, ranges: usize },

    #[error("Slot {slot} is out of bounds (total slots {total})")]
    SlotOutOfBounds { slot: usize, total: usize },

    #[error("Buffer lock was poisoned: {0}")]
    LockPoisoned(String),

    #[error("Failed to save cache to '{path}': {reason}")]
    SaveFailed { path: String, reason: String },

    #[error("Vector cache was dropped")]
    Closed,
}

/// Errors raised at the worker task boundary
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Failed to read '{file}': {reason}")]
    ReadFailed { file: String, reason: String },

    #[error("Failed to write index '{file}': {reason}")]
    WriteFailed { file: String, reason: String },

    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<anyhow::Error> for IndexError {
    fn from(err: anyhow::Error) -> Self {
        IndexError::Other(format!("{:#}", err))
    }
}

impl IndexError {
    /// Check if this is a caller error (bad configuration or contract violation)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            IndexError::Config(ConfigError::InvalidValue { .. })
                | IndexError::VectorDb(VectorDbError::DimensionMismatch { .. })
                | IndexError::VectorDb(VectorDbError::InvalidTopK)
                | IndexError::VectorCache(CacheError::DimensionMismatch { .. })
                | IndexError::VectorCache(CacheError::RangeCountMismatch { .. })
        )
    }

    /// Check if retrying the operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::VectorDb(VectorDbError::Locked(_))
                | IndexError::Task(TaskError::ReadFailed { .. })
                | IndexError::Io(_)
        )
    }
}
