//! Dual-tier memory store.
//!
//! Session memories live in one table per session (`session_<id>`) and are
//! dropped when the session ends. Persistent memories share the
//! `persistent_memory` table. New rows are written with the dimension reported
//! by the embedding model at startup, and searches only rank rows of that
//! dimension. Every table's original dimension and schema version is tracked
//! in the ledger so model swaps and schema bumps are detected across restarts.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;

use super::config::MemoryConfig;
use super::database::{FieldValue, Fields, Row, RowFilter, SqliteVecDatabase, VectorDatabase};
use super::embeddings::EmbeddingProvider;
use super::error::{MemoryError, Result};
use super::facts::{parse_facts, FACT_EXTRACTION_PROMPT, FACT_EXTRACTION_TEMPERATURE};
use super::ledger::{LedgerEntry, TableLedger};
use super::schema::{resolve_model_dimension, session_table_name, TableSchema, PERSISTENT_TABLE};
use super::types::{
    MemoryQueryResult, MemorySource, MemoryType, PersistentItem, QueryOptions, SessionItem,
    TableStatus, SOURCE_CONVERSATION_FACT, SOURCE_EXPLICIT,
};
use crate::ai::llm_client::{ChatOptions, ChatProvider};
use crate::ai::types::ChatMessage;

/// State that exists only after a successful [`MemoryStore::initialize`].
struct Ready {
    db: Arc<dyn VectorDatabase>,
    dimension: usize,
    session_schema: TableSchema,
    persistent_schema: TableSchema,
    ledger: Mutex<TableLedger>,
}

impl Ready {
    async fn ensure_table(&self, name: &str, schema: &TableSchema) -> Result<TableStatus> {
        let current = LedgerEntry::new(schema.dimension, schema.schema_version);

        let exists = self
            .db
            .table_exists(name)
            .await
            .map_err(MemoryError::Database)?;

        if !exists {
            self.db
                .create_empty_table(name, schema)
                .await
                .map_err(MemoryError::Database)?;
            self.ledger
                .lock()
                .record(name, current)
                .map_err(MemoryError::Ledger)?;
            tracing::info!(
                table = %name,
                "Created memory table (dimension {}, schema v{})",
                schema.dimension,
                schema.schema_version
            );
            return Ok(TableStatus::Created);
        }

        let recorded = self.ledger.lock().get(name);
        let Some(entry) = recorded else {
            tracing::warn!(
                table = %name,
                "Table has no ledger entry, assuming dimension {} and schema v{}",
                schema.dimension,
                schema.schema_version
            );
            self.ledger
                .lock()
                .record(name, current)
                .map_err(MemoryError::Ledger)?;
            return Ok(TableStatus::Adopted);
        };

        let dimension_differs = entry.dimension != schema.dimension;
        if dimension_differs {
            tracing::warn!(
                table = %name,
                "Table was created with dimension {} but the current model produces {}; \
                 existing rows keep their original vectors",
                entry.dimension,
                schema.dimension
            );
        }

        match entry.schema_version.cmp(&schema.schema_version) {
            std::cmp::Ordering::Less => self.migrate(name, schema, entry).await,
            std::cmp::Ordering::Greater => {
                tracing::error!(
                    table = %name,
                    "CRITICAL: table schema v{} is newer than supported v{} (was this build downgraded?); \
                     leaving it untouched",
                    entry.schema_version,
                    schema.schema_version
                );
                Ok(TableStatus::NewerThanSupported {
                    stored: entry.schema_version,
                    supported: schema.schema_version,
                })
            }
            std::cmp::Ordering::Equal if dimension_differs => Ok(TableStatus::DimensionMismatch {
                stored: entry.dimension,
                current: schema.dimension,
            }),
            std::cmp::Ordering::Equal => Ok(TableStatus::Ready),
        }
    }

    /// Destructive migration: drop, recreate empty, then record the new entry.
    ///
    /// The ledger is only touched once the table has been recreated.
    async fn migrate(
        &self,
        name: &str,
        schema: &TableSchema,
        previous: LedgerEntry,
    ) -> Result<TableStatus> {
        tracing::error!(
            table = %name,
            "Migrating table from schema v{} to v{}: ALL ROWS IN THIS TABLE WILL BE LOST",
            previous.schema_version,
            schema.schema_version
        );

        let failed = |stage: &str, e: anyhow::Error| MemoryError::MigrationFailed {
            table: name.to_string(),
            reason: format!("{}: {:#}", stage, e),
        };

        self.db
            .drop_table(name)
            .await
            .map_err(|e| failed("drop failed", e))?;
        self.db
            .create_empty_table(name, schema)
            .await
            .map_err(|e| failed("recreate failed", e))?;
        self.ledger
            .lock()
            .record(
                name,
                LedgerEntry::new(schema.dimension, schema.schema_version),
            )
            .map_err(|e| failed("ledger update failed", e))?;

        tracing::info!(table = %name, "Migration to schema v{} complete", schema.schema_version);
        Ok(TableStatus::Migrated {
            from: previous.schema_version,
            to: schema.schema_version,
        })
    }

    /// Create the table if it is missing; existing tables are used as-is.
    async fn ensure_writable(&self, name: &str, schema: &TableSchema) -> Result<()> {
        let exists = self
            .db
            .table_exists(name)
            .await
            .map_err(MemoryError::Database)?;
        if !exists {
            self.ensure_table(name, schema).await?;
        }
        Ok(())
    }

    async fn search_tier(
        &self,
        table: &str,
        vector: &[f32],
        limit: usize,
        memory_type: MemoryType,
    ) -> Result<Vec<MemoryQueryResult>> {
        let exists = self
            .db
            .table_exists(table)
            .await
            .map_err(MemoryError::Database)?;
        if !exists {
            tracing::debug!(table = %table, "Memory table missing, no results for this tier");
            return Ok(Vec::new());
        }

        let recorded = self.ledger.lock().get(table);
        if let Some(entry) = recorded.filter(|e| e.dimension != vector.len()) {
            tracing::debug!(
                table = %table,
                "Table was created with {}-dimensional vectors; only {}-dimensional rows are searched",
                entry.dimension,
                vector.len()
            );
        }

        let hits = self
            .db
            .search(table, vector, limit)
            .await
            .map_err(MemoryError::Database)?;

        Ok(hits
            .into_iter()
            .map(|hit| MemoryQueryResult {
                text: text_field(&hit.fields),
                source: source_field(&hit.fields, memory_type),
                score: hit.distance,
                memory_type,
            })
            .collect())
    }
}

fn text_field(fields: &Fields) -> String {
    fields
        .get("text")
        .and_then(FieldValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn source_field(fields: &Fields, memory_type: MemoryType) -> MemorySource {
    match memory_type {
        MemoryType::Session => MemorySource::Label(
            fields
                .get("source")
                .and_then(FieldValue::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        MemoryType::Persistent => MemorySource::Ids(
            fields
                .get("source_ids")
                .and_then(FieldValue::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default(),
        ),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Embedding-backed memory with session and persistent tiers.
pub struct MemoryStore {
    config: MemoryConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Option<Arc<dyn ChatProvider>>,
    database: Option<Arc<dyn VectorDatabase>>,
    ready: RwLock<Option<Ready>>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config,
            embedder,
            chat: None,
            database: None,
            ready: RwLock::new(None),
        }
    }

    /// Model used by [`extract_facts`](Self::extract_facts).
    pub fn with_chat_provider(mut self, chat: Arc<dyn ChatProvider>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Use this database instead of opening the SQLite file in the storage
    /// directory.
    pub fn with_database(mut self, database: Arc<dyn VectorDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub async fn is_initialized(&self) -> bool {
        self.ready.read().await.is_some()
    }

    /// Active embedding dimension, once initialized.
    pub async fn dimension(&self) -> Option<usize> {
        self.ready.read().await.as_ref().map(|r| r.dimension)
    }

    /// Copy of the current ledger entries.
    pub async fn ledger_snapshot(&self) -> Result<BTreeMap<String, LedgerEntry>> {
        let guard = self.ready.read().await;
        let ready = guard.as_ref().ok_or(MemoryError::NotInitialized)?;
        let entries = ready.ledger.lock().entries().clone();
        Ok(entries)
    }

    /// Prepare storage, the model and the tables for `session_id`.
    ///
    /// Calling this again (for any session) only makes sure that session's
    /// table exists.
    pub async fn initialize(&self, session_id: &str) -> Result<()> {
        let session_table = session_table_name(session_id);

        // Tables already at the current schema version need no write lock
        {
            let guard = self.ready.read().await;
            if let Some(ready) = guard.as_ref() {
                let recorded = ready.ledger.lock().get(&session_table);
                let current = recorded
                    .is_some_and(|e| e.schema_version == ready.session_schema.schema_version);
                if current
                    && ready
                        .db
                        .table_exists(&session_table)
                        .await
                        .map_err(MemoryError::Database)?
                {
                    return Ok(());
                }
            }
        }

        let mut guard = self.ready.write().await;
        if let Some(ready) = guard.as_ref() {
            ready
                .ensure_table(&session_table, &ready.session_schema)
                .await?;
            return Ok(());
        }

        tracing::info!("Initializing memory store at {:?}", self.config.storage_dir);
        tokio::fs::create_dir_all(&self.config.storage_dir).await?;

        let ledger = TableLedger::load(self.config.ledger_path()).map_err(MemoryError::Ledger)?;

        let db: Arc<dyn VectorDatabase> = match &self.database {
            Some(db) => Arc::clone(db),
            None => Arc::new(
                SqliteVecDatabase::open(&self.config.db_path()).map_err(MemoryError::Database)?,
            ),
        };

        self.embedder.load().await.map_err(MemoryError::Embedding)?;
        let dimension = resolve_model_dimension(self.embedder.dimension());
        tracing::info!(
            "Embedding model '{}' loaded ({} dimensions)",
            self.embedder.name(),
            dimension
        );

        let ready = Ready {
            db,
            dimension,
            session_schema: TableSchema::session(dimension),
            persistent_schema: TableSchema::persistent(dimension),
            ledger: Mutex::new(ledger),
        };

        ready
            .ensure_table(PERSISTENT_TABLE, &ready.persistent_schema)
            .await?;
        ready
            .ensure_table(&session_table, &ready.session_schema)
            .await?;

        *guard = Some(ready);
        tracing::info!("Memory store initialized");
        Ok(())
    }

    /// Create, adopt, check or migrate a table against `schema`.
    pub async fn ensure_table_exists(&self, name: &str, schema: &TableSchema) -> Result<TableStatus> {
        let guard = self.ready.read().await;
        let ready = guard.as_ref().ok_or(MemoryError::NotInitialized)?;
        ready.ensure_table(name, schema).await
    }

    /// Embed `texts` and check every vector has the active dimension.
    async fn embed_checked(&self, ready: &Ready, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let vectors = self
            .embedder
            .embed(texts)
            .await
            .map_err(MemoryError::Embedding)?;

        if vectors.len() != expected {
            return Err(MemoryError::Embedding(anyhow::anyhow!(
                "Embedding provider returned {} vectors for {} texts",
                vectors.len(),
                expected
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != ready.dimension) {
            return Err(MemoryError::DimensionMismatch {
                expected: ready.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }

    /// Store items in the session's table.
    pub async fn add_session_items(&self, session_id: &str, items: Vec<SessionItem>) -> Result<()> {
        let guard = self.ready.read().await;
        let ready = guard.as_ref().ok_or(MemoryError::NotInitialized)?;
        if items.is_empty() {
            return Ok(());
        }

        let table = session_table_name(session_id);
        ready.ensure_writable(&table, &ready.session_schema).await?;

        let texts = items.iter().map(|i| i.text.clone()).collect();
        let vectors = self.embed_checked(ready, texts).await?;

        let timestamp = now_millis();
        let count = items.len();
        let rows = items
            .into_iter()
            .zip(vectors)
            .map(|(item, vector)| {
                Row::new(vector)
                    .field("text", item.text)
                    .field("source", item.source)
                    .field("timestamp", timestamp)
            })
            .collect();

        ready
            .db
            .add(&table, rows)
            .await
            .map_err(MemoryError::Database)?;
        tracing::debug!(table = %table, "Added {} session memories", count);
        Ok(())
    }

    /// Store items in the persistent table.
    pub async fn add_persistent_items(&self, items: Vec<PersistentItem>) -> Result<()> {
        let guard = self.ready.read().await;
        let ready = guard.as_ref().ok_or(MemoryError::NotInitialized)?;
        if items.is_empty() {
            return Ok(());
        }

        ready
            .ensure_writable(PERSISTENT_TABLE, &ready.persistent_schema)
            .await?;

        let texts = items.iter().map(|i| i.text.clone()).collect();
        let vectors = self.embed_checked(ready, texts).await?;

        let timestamp = now_millis();
        let count = items.len();
        let mut rows = Vec::with_capacity(count);
        for (item, vector) in items.into_iter().zip(vectors) {
            let source_ids = serde_json::to_string(&item.source_ids)
                .map_err(|e| MemoryError::Database(e.into()))?;
            rows.push(
                Row::new(vector)
                    .field("text", item.text)
                    .field("source_ids", source_ids)
                    .field("timestamp", timestamp)
                    .field("last_accessed", timestamp),
            );
        }

        ready
            .db
            .add(PERSISTENT_TABLE, rows)
            .await
            .map_err(MemoryError::Database)?;
        tracing::debug!("Added {} persistent memories", count);
        Ok(())
    }

    /// Nearest memories to `query` across both tiers, closest first.
    ///
    /// A tier with a limit of 0 is not searched. A missing table contributes
    /// no results.
    pub async fn query_memories(
        &self,
        query: &str,
        session_id: &str,
        options: QueryOptions,
    ) -> Result<Vec<MemoryQueryResult>> {
        let guard = self.ready.read().await;
        let ready = guard.as_ref().ok_or(MemoryError::NotInitialized)?;
        if options.session_limit == 0 && options.persistent_limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .embed_checked(ready, vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let mut results = Vec::new();
        if options.session_limit > 0 {
            let table = session_table_name(session_id);
            results.extend(
                ready
                    .search_tier(&table, &vector, options.session_limit, MemoryType::Session)
                    .await?,
            );
        }
        if options.persistent_limit > 0 {
            results.extend(
                ready
                    .search_tier(
                        PERSISTENT_TABLE,
                        &vector,
                        options.persistent_limit,
                        MemoryType::Persistent,
                    )
                    .await?,
            );
        }

        results.sort_by(|a, b| a.score.total_cmp(&b.score));
        tracing::debug!("Memory query returned {} results", results.len());
        Ok(results)
    }

    /// Drop the session's table and forget its ledger entry.
    pub async fn clear_session_memory(&self, session_id: &str) -> Result<()> {
        let guard = self.ready.read().await;
        let ready = guard.as_ref().ok_or(MemoryError::NotInitialized)?;

        let table = session_table_name(session_id);
        ready
            .db
            .drop_table(&table)
            .await
            .map_err(MemoryError::Database)?;
        ready
            .ledger
            .lock()
            .forget(&table)
            .map_err(MemoryError::Ledger)?;
        tracing::info!(table = %table, "Cleared session memory");
        Ok(())
    }

    /// Ask the model for the standalone facts in `text`.
    ///
    /// Never fails once initialized: a missing provider or a failed call
    /// yields no facts.
    pub async fn extract_facts(&self, text: &str) -> Result<Vec<String>> {
        if !self.is_initialized().await {
            return Err(MemoryError::NotInitialized);
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let Some(chat) = &self.chat else {
            tracing::debug!("{}, skipping", MemoryError::ChatUnavailable);
            return Ok(Vec::new());
        };

        let messages = vec![
            ChatMessage::system(FACT_EXTRACTION_PROMPT),
            ChatMessage::user(text),
        ];
        let options = ChatOptions::default()
            .with_temperature(FACT_EXTRACTION_TEMPERATURE)
            .with_max_tokens(512);

        match chat.chat(&messages, &options).await {
            Ok(response) => Ok(parse_facts(&response.content)),
            Err(e) => {
                tracing::warn!("Fact extraction failed: {:#}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Extract facts from an assistant reply and keep them as session
    /// memories. Returns how many were stored.
    pub async fn process_and_store_turn(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<usize> {
        let facts = self.extract_facts(assistant_text).await?;
        tracing::debug!(
            user_len = user_text.len(),
            "Extracted {} facts from assistant reply",
            facts.len()
        );
        if facts.is_empty() {
            return Ok(0);
        }

        let count = facts.len();
        let items = facts
            .into_iter()
            .map(|fact| SessionItem::new(fact, SOURCE_CONVERSATION_FACT))
            .collect();
        self.add_session_items(session_id, items).await?;
        Ok(count)
    }

    /// Copy explicit and fact-derived session memories into persistent
    /// memory. Session rows are left in place.
    pub async fn commit_session_to_persistent(&self, session_id: &str) -> Result<usize> {
        let rows = {
            let guard = self.ready.read().await;
            let ready = guard.as_ref().ok_or(MemoryError::NotInitialized)?;

            let table = session_table_name(session_id);
            let exists = ready
                .db
                .table_exists(&table)
                .await
                .map_err(MemoryError::Database)?;
            if !exists {
                return Ok(0);
            }

            ready
                .db
                .query(
                    &table,
                    RowFilter::AnyOf(
                        "source".to_string(),
                        vec![SOURCE_EXPLICIT.into(), SOURCE_CONVERSATION_FACT.into()],
                    ),
                )
                .await
                .map_err(MemoryError::Database)?
        };

        let items: Vec<PersistentItem> = rows
            .iter()
            .filter_map(|fields| {
                let text = fields.get("text").and_then(FieldValue::as_str)?;
                let source = fields
                    .get("source")
                    .and_then(FieldValue::as_str)
                    .unwrap_or_default();
                Some(PersistentItem::new(
                    text,
                    vec![session_id.to_string(), source.to_string()],
                ))
            })
            .collect();

        let count = items.len();
        self.add_persistent_items(items).await?;
        tracing::info!("Committed {} session memories to persistent memory", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::schema::DEFAULT_EMBEDDING_DIM;
    use crate::testing::{FlakyDatabase, GatedEmbedder, HashingEmbedder, ScriptedChat};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> MemoryStore {
        MemoryStore::new(
            MemoryConfig::test_config(dir.path()),
            Arc::new(HashingEmbedder::new(64)),
        )
    }

    #[tokio::test]
    async fn test_operations_require_initialization() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(matches!(
            store
                .add_session_items("s", vec![SessionItem::new("x", "note")])
                .await,
            Err(MemoryError::NotInitialized)
        ));
        assert!(matches!(
            store.add_persistent_items(vec![]).await,
            Err(MemoryError::NotInitialized)
        ));
        assert!(matches!(
            store
                .query_memories("x", "s", QueryOptions::default())
                .await,
            Err(MemoryError::NotInitialized)
        ));
        assert!(matches!(
            store.clear_session_memory("s").await,
            Err(MemoryError::NotInitialized)
        ));
        assert!(matches!(
            store.extract_facts("x").await,
            Err(MemoryError::NotInitialized)
        ));
        assert!(matches!(
            store.commit_session_to_persistent("s").await,
            Err(MemoryError::NotInitialized)
        ));
        assert!(matches!(
            store
                .ensure_table_exists("t", &TableSchema::session(64))
                .await,
            Err(MemoryError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.initialize("one").await.unwrap();
        store.initialize("one").await.unwrap();
        store.initialize("two").await.unwrap();

        let ledger = store.ledger_snapshot().await.unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger.contains_key("session_one"));
        assert!(ledger.contains_key("session_two"));
        assert_eq!(store.dimension().await, Some(64));
    }

    #[tokio::test]
    async fn test_missing_model_dimension_falls_back() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(
            MemoryConfig::test_config(dir.path()),
            Arc::new(HashingEmbedder::without_dimension(DEFAULT_EMBEDDING_DIM)),
        );
        store.initialize("s").await.unwrap();
        assert_eq!(store.dimension().await, Some(DEFAULT_EMBEDDING_DIM));
    }

    #[tokio::test]
    async fn test_ensure_table_creates_and_records() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();

        let status = store
            .ensure_table_exists("session_new", &TableSchema::session(64))
            .await
            .unwrap();
        assert_eq!(status, TableStatus::Created);

        let ledger = store.ledger_snapshot().await.unwrap();
        assert_eq!(ledger["session_new"], LedgerEntry::new(64, 1));

        let status = store
            .ensure_table_exists("session_new", &TableSchema::session(64))
            .await
            .unwrap();
        assert_eq!(status, TableStatus::Ready);
    }

    #[tokio::test]
    async fn test_ensure_table_adopts_unknown_table() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(SqliteVecDatabase::open_in_memory().unwrap());
        db.create_empty_table("session_legacy", &TableSchema::session(64))
            .await
            .unwrap();

        let store = store(&dir).with_database(db);
        store.initialize("s").await.unwrap();

        let status = store
            .ensure_table_exists("session_legacy", &TableSchema::session(64))
            .await
            .unwrap();
        assert_eq!(status, TableStatus::Adopted);
        assert_eq!(
            store.ledger_snapshot().await.unwrap()["session_legacy"],
            LedgerEntry::new(64, 1)
        );
    }

    #[tokio::test]
    async fn test_ensure_table_dimension_mismatch_is_warning_only() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();
        store
            .ensure_table_exists("session_old", &TableSchema::session(32))
            .await
            .unwrap();

        let status = store
            .ensure_table_exists("session_old", &TableSchema::session(64))
            .await
            .unwrap();
        assert_eq!(
            status,
            TableStatus::DimensionMismatch {
                stored: 32,
                current: 64
            }
        );
        // Ledger keeps the original dimension
        assert_eq!(
            store.ledger_snapshot().await.unwrap()["session_old"],
            LedgerEntry::new(32, 1)
        );
    }

    #[tokio::test]
    async fn test_ensure_table_migrates_older_schema() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();
        store
            .add_persistent_items(vec![PersistentItem::new("old row", vec!["x".into()])])
            .await
            .unwrap();

        let v2 = TableSchema::persistent(64).with_version(2);
        let status = store
            .ensure_table_exists(PERSISTENT_TABLE, &v2)
            .await
            .unwrap();
        assert_eq!(status, TableStatus::Migrated { from: 1, to: 2 });
        assert_eq!(
            store.ledger_snapshot().await.unwrap()[PERSISTENT_TABLE],
            LedgerEntry::new(64, 2)
        );

        // Destructive: the old row is gone
        let results = store
            .query_memories(
                "old row",
                "s",
                QueryOptions {
                    session_limit: 0,
                    persistent_limit: 5,
                },
            )
            .await
            .unwrap();
        assert!(results.is_empty());

        // Ledger on disk was updated too
        let on_disk = TableLedger::load(store.config().ledger_path()).unwrap();
        assert_eq!(on_disk.get(PERSISTENT_TABLE), Some(LedgerEntry::new(64, 2)));
    }

    #[tokio::test]
    async fn test_failed_migration_leaves_ledger_untouched() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(FlakyDatabase::new());
        let store = store(&dir).with_database(db.clone());
        store.initialize("s").await.unwrap();

        db.fail_creates(true);
        let v2 = TableSchema::persistent(64).with_version(2);
        let result = store.ensure_table_exists(PERSISTENT_TABLE, &v2).await;
        assert!(matches!(result, Err(MemoryError::MigrationFailed { .. })));

        assert_eq!(
            store.ledger_snapshot().await.unwrap()[PERSISTENT_TABLE],
            LedgerEntry::new(64, 1)
        );
        let on_disk = TableLedger::load(store.config().ledger_path()).unwrap();
        assert_eq!(on_disk.get(PERSISTENT_TABLE), Some(LedgerEntry::new(64, 1)));
    }

    #[tokio::test]
    async fn test_newer_schema_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();
        store
            .ensure_table_exists("session_future", &TableSchema::session(64).with_version(3))
            .await
            .unwrap();

        let status = store
            .ensure_table_exists("session_future", &TableSchema::session(64))
            .await
            .unwrap();
        assert_eq!(
            status,
            TableStatus::NewerThanSupported {
                stored: 3,
                supported: 1
            }
        );
        assert_eq!(
            store.ledger_snapshot().await.unwrap()["session_future"],
            LedgerEntry::new(64, 3)
        );
    }

    #[tokio::test]
    async fn test_query_skips_tiers_with_zero_limit() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();
        store
            .add_session_items("s", vec![SessionItem::new("apples are red", "note")])
            .await
            .unwrap();
        store
            .add_persistent_items(vec![PersistentItem::new(
                "apples are tasty",
                vec!["s".into(), "explicit".into()],
            )])
            .await
            .unwrap();

        let session_only = store
            .query_memories(
                "apples",
                "s",
                QueryOptions {
                    session_limit: 5,
                    persistent_limit: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(session_only.len(), 1);
        assert_eq!(session_only[0].memory_type, MemoryType::Session);
        assert_eq!(session_only[0].source, MemorySource::Label("note".into()));

        let persistent_only = store
            .query_memories(
                "apples",
                "s",
                QueryOptions {
                    session_limit: 0,
                    persistent_limit: 5,
                },
            )
            .await
            .unwrap();
        assert_eq!(persistent_only.len(), 1);
        assert_eq!(persistent_only[0].memory_type, MemoryType::Persistent);
        assert_eq!(
            persistent_only[0].source,
            MemorySource::Ids(vec!["s".into(), "explicit".into()])
        );

        let neither = store
            .query_memories(
                "apples",
                "s",
                QueryOptions {
                    session_limit: 0,
                    persistent_limit: 0,
                },
            )
            .await
            .unwrap();
        assert!(neither.is_empty());
    }

    #[tokio::test]
    async fn test_query_missing_session_table_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();

        let results = store
            .query_memories("anything", "never-created", QueryOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_query_merges_tiers_by_score() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();
        store
            .add_session_items(
                "s",
                vec![
                    SessionItem::new("the garden has roses", "note"),
                    SessionItem::new("invoices are due friday", "note"),
                ],
            )
            .await
            .unwrap();
        store
            .add_persistent_items(vec![PersistentItem::new(
                "the user loves roses in the garden",
                vec!["old".into()],
            )])
            .await
            .unwrap();

        let results = store
            .query_memories("roses garden", "s", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].score <= w[1].score));
        assert_eq!(results[2].text, "invoices are due friday");
    }

    #[tokio::test]
    async fn test_wrong_dimension_write_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(
            MemoryConfig::test_config(dir.path()),
            Arc::new(HashingEmbedder::new(64).reporting(32)),
        );
        store.initialize("s").await.unwrap();

        let result = store
            .add_session_items("s", vec![SessionItem::new("x", "note")])
            .await;
        assert!(matches!(
            result,
            Err(MemoryError::DimensionMismatch {
                expected: 32,
                actual: 64
            })
        ));
    }

    #[tokio::test]
    async fn test_model_upgrade_keeps_tables_writable() {
        let dir = TempDir::new().unwrap();
        {
            let store = store(&dir);
            store.initialize("s").await.unwrap();
            store
                .add_session_items("s", vec![SessionItem::new("written in 64d", "note")])
                .await
                .unwrap();
            store
                .add_persistent_items(vec![PersistentItem::new("old fact 64d", vec![])])
                .await
                .unwrap();
        }

        // Same directory, new model with a smaller dimension
        let store = MemoryStore::new(
            MemoryConfig::test_config(dir.path()),
            Arc::new(HashingEmbedder::new(32)),
        );
        store.initialize("s").await.unwrap();
        store
            .add_session_items("s", vec![SessionItem::new("written in 32d", "note")])
            .await
            .unwrap();
        store
            .add_persistent_items(vec![PersistentItem::new("new fact 32d", vec![])])
            .await
            .unwrap();

        let mut texts: Vec<String> = store
            .query_memories("written fact", "s", QueryOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.text)
            .collect();
        texts.sort();
        assert_eq!(
            texts,
            vec!["new fact 32d".to_string(), "written in 32d".to_string()]
        );

        // The ledger still reports the dimension the tables were created with
        let ledger = store.ledger_snapshot().await.unwrap();
        assert_eq!(ledger["session_s"].dimension, 64);
        assert_eq!(ledger[PERSISTENT_TABLE].dimension, 64);
        assert_eq!(
            store
                .ensure_table_exists("session_s", &TableSchema::session(32))
                .await
                .unwrap(),
            TableStatus::DimensionMismatch {
                stored: 64,
                current: 32
            }
        );
    }

    #[tokio::test]
    async fn test_initialize_does_not_wait_for_readers() {
        let dir = TempDir::new().unwrap();
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let store = Arc::new(MemoryStore::new(
            MemoryConfig::test_config(dir.path()),
            Arc::new(GatedEmbedder::new(
                HashingEmbedder::new(64),
                Arc::clone(&entered),
                Arc::clone(&release),
            )),
        ));
        store.initialize("s").await.unwrap();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .add_session_items("s", vec![SessionItem::new("slow", "note")])
                    .await
            })
        };
        // The write now holds the store open while embedding
        entered.notified().await;

        tokio::time::timeout(std::time::Duration::from_secs(5), store.initialize("s"))
            .await
            .expect("initialize blocked behind an in-flight write")
            .unwrap();

        release.notify_one();
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_session_ids_differing_in_punctuation_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ids = ["user-1", "user_1", "USER_1"];
        for id in ids {
            store.initialize(id).await.unwrap();
            store
                .add_session_items(id, vec![SessionItem::new(format!("owned by {}", id), "note")])
                .await
                .unwrap();
        }

        for id in ids {
            let results = store
                .query_memories("owned by", id, QueryOptions::default())
                .await
                .unwrap();
            let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
            assert_eq!(texts, vec![format!("owned by {}", id).as_str()]);
        }

        store.clear_session_memory("user-1").await.unwrap();
        assert!(store
            .query_memories("owned by", "user-1", QueryOptions::default())
            .await
            .unwrap()
            .is_empty());
        for id in ["user_1", "USER_1"] {
            assert_eq!(
                store
                    .query_memories("owned by", id, QueryOptions::default())
                    .await
                    .unwrap()
                    .len(),
                1
            );
        }
    }

    #[tokio::test]
    async fn test_clear_session_memory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();
        store
            .add_session_items("s", vec![SessionItem::new("temporary", "note")])
            .await
            .unwrap();

        store.clear_session_memory("s").await.unwrap();
        store.clear_session_memory("s").await.unwrap();

        assert!(!store.ledger_snapshot().await.unwrap().contains_key("session_s"));
        let results = store
            .query_memories("temporary", "s", QueryOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());

        // Writing again recreates the table
        store
            .add_session_items("s", vec![SessionItem::new("again", "note")])
            .await
            .unwrap();
        assert!(store.ledger_snapshot().await.unwrap().contains_key("session_s"));
    }

    #[tokio::test]
    async fn test_extract_facts_without_chat_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("s").await.unwrap();
        assert!(store.extract_facts("The sky is blue.").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_facts_failure_is_empty() {
        let dir = TempDir::new().unwrap();
        let chat = Arc::new(ScriptedChat::failing("model offline"));
        let store = store(&dir).with_chat_provider(chat);
        store.initialize("s").await.unwrap();
        assert!(store.extract_facts("The sky is blue.").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_facts_uses_low_temperature() {
        let dir = TempDir::new().unwrap();
        let chat = Arc::new(ScriptedChat::new(vec![r#"["The sky is blue."]"#]));
        let store = store(&dir).with_chat_provider(chat.clone());
        store.initialize("s").await.unwrap();

        let facts = store.extract_facts("Look, the sky is blue today!").await.unwrap();
        assert_eq!(facts, vec!["The sky is blue."]);

        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.temperature, Some(FACT_EXTRACTION_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_process_and_store_turn() {
        let dir = TempDir::new().unwrap();
        let chat = Arc::new(ScriptedChat::new(vec![
            "- Paris is the capital of France.\n- The Seine flows through Paris.",
        ]));
        let store = store(&dir).with_chat_provider(chat);
        store.initialize("s").await.unwrap();

        let stored = store
            .process_and_store_turn("s", "Tell me about Paris", "Paris is the capital...")
            .await
            .unwrap();
        assert_eq!(stored, 2);

        let results = store
            .query_memories(
                "capital of France",
                "s",
                QueryOptions {
                    session_limit: 5,
                    persistent_limit: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.source == MemorySource::Label(SOURCE_CONVERSATION_FACT.into())));
    }

    #[tokio::test]
    async fn test_commit_session_to_persistent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.initialize("chat1").await.unwrap();
        store
            .add_session_items(
                "chat1",
                vec![
                    SessionItem::new("user birthday is in may", SOURCE_EXPLICIT),
                    SessionItem::new("rust uses ownership", SOURCE_CONVERSATION_FACT),
                    SessionItem::new("scratch note", "note"),
                ],
            )
            .await
            .unwrap();

        let committed = store.commit_session_to_persistent("chat1").await.unwrap();
        assert_eq!(committed, 2);

        let persistent = store
            .query_memories(
                "birthday may",
                "chat1",
                QueryOptions {
                    session_limit: 0,
                    persistent_limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(persistent.len(), 2);
        assert_eq!(persistent[0].text, "user birthday is in may");
        assert_eq!(
            persistent[0].source,
            MemorySource::Ids(vec!["chat1".into(), SOURCE_EXPLICIT.into()])
        );

        // Originals stay in session memory
        let session = store
            .query_memories(
                "birthday",
                "chat1",
                QueryOptions {
                    session_limit: 10,
                    persistent_limit: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(session.len(), 3);

        assert_eq!(store.commit_session_to_persistent("missing").await.unwrap(), 0);
    }
}
