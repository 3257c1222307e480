//! Associative Memory
//!
//! A dual-tier vector store backing the turn orchestrator.
//!
//! ## Tiers
//!
//! ### Session memory
//! - One `session_<id>` table per conversation session
//! - Written by the `remember` tool (`explicit`) and by fact extraction
//!   after each turn (`conversation_fact`)
//! - Dropped wholesale with [`MemoryStore::clear_session_memory`]
//!
//! ### Persistent memory
//! - A single `persistent_memory` table shared across sessions
//! - Filled by [`MemoryStore::commit_session_to_persistent`] or directly
//!
//! ## Dimension and schema governance
//!
//! The vector width is whatever the loaded embedding model reports. The
//! sidecar ledger (`table_dimensions.json`) records the dimension and schema
//! version each table was created with, so a model swap is detected (and
//! warned about) and a schema bump triggers a destructive migration.

pub mod config;
pub mod database;
pub mod embeddings;
pub mod error;
pub mod facts;
pub mod ledger;
pub mod schema;
pub mod store;
pub mod types;


pub use config::MemoryConfig;
pub use database::{SqliteVecDatabase, VectorDatabase};
pub use embeddings::{EmbeddingProvider, FastEmbedProvider};
pub use error::MemoryError;
pub use ledger::{LedgerEntry, TableLedger};
pub use schema::TableSchema;
pub use store::MemoryStore;
pub use types::{
    MemoryQueryResult, MemorySource, MemoryType, PersistentItem, QueryOptions, SessionItem,
    TableStatus,
};
