//! Error types for the memory store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory store not initialized")]
    NotInitialized,

    #[error("Migration of table '{table}' failed: {reason}")]
    MigrationFailed { table: String, reason: String },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding error: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[source] anyhow::Error),

    #[error("No chat provider configured for fact extraction")]
    ChatUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
