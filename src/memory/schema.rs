//! Table schema generation for the two memory tiers.
//!
//! Schemas are generated at runtime from the embedding dimension reported by
//! the loaded model, so the same code serves 384-, 768- or 1024-dimensional
//! models.

use serde::{Deserialize, Serialize};

/// Dimension used when the embedding model doesn't report a usable one.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Current schema version of session tables.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Current schema version of the persistent table.
pub const PERSISTENT_SCHEMA_VERSION: u32 = 1;

/// Name of the single cross-session table.
pub const PERSISTENT_TABLE: &str = "persistent_memory";

/// Prefix of per-session table names.
pub const SESSION_TABLE_PREFIX: &str = "session_";

/// Which memory tier a table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Session,
    Persistent,
}

impl TableKind {
    /// Schema version the running code requires for this tier.
    pub fn current_version(self) -> u32 {
        match self {
            TableKind::Session => SESSION_SCHEMA_VERSION,
            TableKind::Persistent => PERSISTENT_SCHEMA_VERSION,
        }
    }
}

/// Storage type of a non-vector column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
        }
    }
}

/// A non-vector column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
}

impl Column {
    const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self { name, column_type }
    }
}

/// Name of the vector column in every table.
pub const VECTOR_COLUMN: &str = "embedding";

const SESSION_COLUMNS: &[Column] = &[
    Column::new("source", ColumnType::Text),
    Column::new("timestamp", ColumnType::Integer),
    Column::new("text", ColumnType::Text),
];

const PERSISTENT_COLUMNS: &[Column] = &[
    Column::new("timestamp", ColumnType::Integer),
    Column::new("last_accessed", ColumnType::Integer),
    Column::new("text", ColumnType::Text),
    Column::new("source_ids", ColumnType::Text),
];

/// Generated description of a memory table.
///
/// `dimension` is what new rows are written with. Tables don't fix a vector
/// width, so rows from earlier models stay readable next to new ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub kind: TableKind,
    pub dimension: usize,
    pub schema_version: u32,
    pub columns: &'static [Column],
}

impl TableSchema {
    /// Schema for a session table.
    pub fn session(dimension: usize) -> Self {
        Self {
            kind: TableKind::Session,
            dimension: validate_dimension(dimension, "session"),
            schema_version: TableKind::Session.current_version(),
            columns: SESSION_COLUMNS,
        }
    }

    /// Schema for the persistent table.
    pub fn persistent(dimension: usize) -> Self {
        Self {
            kind: TableKind::Persistent,
            dimension: validate_dimension(dimension, "persistent"),
            schema_version: TableKind::Persistent.current_version(),
            columns: PERSISTENT_COLUMNS,
        }
    }

    /// Same schema with a different version. Used to exercise migrations.
    pub fn with_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Column definitions for `CREATE TABLE`. Vectors are float32 blobs.
    pub fn column_definitions(&self) -> String {
        let mut parts = vec![format!("{} blob not null", VECTOR_COLUMN)];
        for column in self.columns {
            parts.push(format!("{} {}", column.name, column.column_type.sql()));
        }
        parts.join(", ")
    }
}

/// Return `dimension` if usable, otherwise log and fall back to the default.
fn validate_dimension(dimension: usize, schema: &str) -> usize {
    if dimension == 0 {
        tracing::error!(
            "Invalid embedding dimension 0 for {} schema, falling back to {}",
            schema,
            DEFAULT_EMBEDDING_DIM
        );
        return DEFAULT_EMBEDDING_DIM;
    }
    dimension
}

/// Resolve the dimension reported by an embedding model.
///
/// This is the only place a missing model dimension is replaced by a default.
pub fn resolve_model_dimension(reported: Option<usize>) -> usize {
    match reported {
        Some(dim) if dim > 0 => dim,
        other => {
            tracing::error!(
                "CRITICAL: embedding model reported no usable dimension ({:?}); using default {}",
                other,
                DEFAULT_EMBEDDING_DIM
            );
            DEFAULT_EMBEDDING_DIM
        }
    }
}

/// Table name for a session id.
///
/// Lowercase ASCII letters and digits are kept; every other byte becomes
/// `_` plus two hex digits. Distinct ids always get distinct names, even
/// under SQLite's case-insensitive identifiers.
pub fn session_table_name(session_id: &str) -> String {
    let mut name = String::from(SESSION_TABLE_PREFIX);
    for byte in session_id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
            name.push(byte as char);
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_schema() {
        let schema = TableSchema::session(768);
        assert_eq!(schema.kind, TableKind::Session);
        assert_eq!(schema.dimension, 768);
        assert_eq!(schema.schema_version, TableKind::Session.current_version());
        assert!(schema.has_column("source"));
        assert!(schema.has_column("text"));
        assert!(!schema.has_column("source_ids"));
    }

    #[test]
    fn test_persistent_schema() {
        let schema = TableSchema::persistent(384);
        assert_eq!(schema.kind, TableKind::Persistent);
        assert!(schema.has_column("source_ids"));
        assert!(schema.has_column("last_accessed"));
    }

    #[test]
    fn test_zero_dimension_falls_back() {
        assert_eq!(TableSchema::session(0).dimension, DEFAULT_EMBEDDING_DIM);
        assert_eq!(TableSchema::persistent(0).dimension, DEFAULT_EMBEDDING_DIM);
    }

    #[test]
    fn test_resolve_model_dimension() {
        assert_eq!(resolve_model_dimension(Some(1024)), 1024);
        assert_eq!(resolve_model_dimension(Some(0)), DEFAULT_EMBEDDING_DIM);
        assert_eq!(resolve_model_dimension(None), DEFAULT_EMBEDDING_DIM);
    }

    #[test]
    fn test_column_definitions() {
        assert_eq!(
            TableSchema::session(4).column_definitions(),
            "embedding blob not null, source text, timestamp integer, text text"
        );
        assert_eq!(
            TableSchema::persistent(4).column_definitions(),
            "embedding blob not null, timestamp integer, last_accessed integer, text text, source_ids text"
        );
    }

    #[test]
    fn test_with_version() {
        let schema = TableSchema::persistent(384).with_version(2);
        assert_eq!(schema.schema_version, 2);
        assert_eq!(
            TableSchema::persistent(384).schema_version,
            TableKind::Persistent.current_version()
        );
    }

    #[test]
    fn test_session_table_name() {
        assert_eq!(session_table_name("abc"), "session_abc");
        assert_eq!(session_table_name("chat42"), "session_chat42");
        assert_eq!(session_table_name("Chat-42/x y"), "session__43hat_2d42_2fx_20y");
    }

    #[test]
    fn test_session_table_names_are_distinct() {
        let ids = ["user-1", "user_1", "USER_1", "user 1", "user.1", "user1", "User1"];
        let names: std::collections::HashSet<String> =
            ids.iter().map(|id| session_table_name(id)).collect();
        assert_eq!(names.len(), ids.len());
        // Names compare case-insensitively in SQLite
        let folded: std::collections::HashSet<String> =
            names.iter().map(|n| n.to_ascii_lowercase()).collect();
        assert_eq!(folded.len(), ids.len());
    }
}
