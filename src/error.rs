use serde::Serialize;
use thiserror::Error;

use crate::ai::ExecutionError;
use crate::memory::MemoryError;

#[derive(Debug, Error)]
pub enum EngramError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Settings error: {0}")]
    Settings(#[source] anyhow::Error),

    #[error("Initialization failed: {0}")]
    Init(#[source] anyhow::Error),
}

// Callers forwarding errors over JSON only need the message
impl Serialize for EngramError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngramError>;
