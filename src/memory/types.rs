//! Memory record and query types.

use serde::{Deserialize, Serialize};

/// Source label for memories written by the `remember` tool.
pub const SOURCE_EXPLICIT: &str = "explicit";

/// Source label for facts extracted from assistant replies.
pub const SOURCE_CONVERSATION_FACT: &str = "conversation_fact";

/// Item to store in session memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionItem {
    pub text: String,
    pub source: String,
}

impl SessionItem {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

/// Item to store in persistent memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentItem {
    pub text: String,
    pub source_ids: Vec<String>,
}

impl PersistentItem {
    pub fn new(text: impl Into<String>, source_ids: Vec<String>) -> Self {
        Self {
            text: text.into(),
            source_ids,
        }
    }
}

/// Per-tier result caps for [`MemoryStore::query_memories`](super::MemoryStore::query_memories).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub session_limit: usize,
    pub persistent_limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            session_limit: 10,
            persistent_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Session,
    Persistent,
}

/// Where a memory came from: a label for session rows, the list of
/// originating ids for persistent rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemorySource {
    Label(String),
    Ids(Vec<String>),
}

/// One retrieved memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQueryResult {
    pub text: String,
    pub source: MemorySource,
    /// Distance to the query (lower is more similar).
    pub score: f32,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
}

/// What [`MemoryStore::ensure_table_exists`](super::MemoryStore::ensure_table_exists) found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    /// Table was missing and has been created.
    Created,
    /// Table existed without a ledger entry; the current dimension and
    /// version were recorded for it.
    Adopted,
    /// Table exists and matches the current dimension and version.
    Ready,
    /// Table exists with vectors of another dimension. New rows use the
    /// current one.
    DimensionMismatch { stored: usize, current: usize },
    /// Table was dropped and recreated at a newer schema version.
    Migrated { from: u32, to: u32 },
    /// Ledger records a version newer than this build supports.
    NewerThanSupported { stored: u32, supported: u32 },
}
