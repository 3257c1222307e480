//! Test doubles shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::ai::llm_client::{ChatOptions, ChatProvider, ChatResponse};
use crate::ai::types::ChatMessage;
use crate::memory::database::{Fields, Row, RowFilter, SearchHit, SqliteVecDatabase, VectorDatabase};
use crate::memory::embeddings::EmbeddingProvider;
use crate::memory::schema::TableSchema;

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into a bucket and the
/// counts are L2-normalized, so texts sharing more words are closer.
pub struct HashingEmbedder {
    dimension: usize,
    reported: Option<usize>,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            reported: Some(dimension),
        }
    }

    /// Embedder whose model reports no dimension.
    pub fn without_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            reported: None,
        }
    }

    /// Report `dimension` while still producing vectors of the real size.
    pub fn reporting(mut self, dimension: usize) -> Self {
        self.reported = Some(dimension);
        self
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> Option<usize> {
        self.reported
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// Embedder that signals `entered` and then waits for `release` on every
/// `embed` call.
pub struct GatedEmbedder {
    inner: HashingEmbedder,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedEmbedder {
    pub fn new(inner: HashingEmbedder, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            inner,
            entered,
            release,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GatedEmbedder {
    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.embed(texts).await
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Chat provider that replays canned replies and records every call.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<(Vec<ChatMessage>, ChatOptions)>>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from(vec![Err(message.to_string())])),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<ChatMessage>, ChatOptions)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatResponse> {
        self.calls.lock().push((messages.to_vec(), options.clone()));
        let reply = {
            let mut replies = self.replies.lock();
            // A lone failure repeats forever
            let repeat = replies.len() == 1 && matches!(replies.front(), Some(Err(_)));
            if repeat {
                replies.front().cloned()
            } else {
                replies.pop_front()
            }
        };
        match reply {
            Some(Ok(text)) => Ok(ChatResponse::text(text)),
            Some(Err(message)) => bail!("{}", message),
            None => bail!("no scripted reply left"),
        }
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Chat provider whose calls never complete.
pub struct PendingChat;

#[async_trait]
impl ChatProvider for PendingChat {
    async fn chat(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Result<ChatResponse> {
        futures::future::pending::<()>().await;
        bail!("unreachable")
    }

    fn provider_name(&self) -> &'static str {
        "pending"
    }
}

/// In-memory sqlite-vec database whose table creation can be made to fail.
pub struct FlakyDatabase {
    inner: SqliteVecDatabase,
    fail_creates: AtomicBool,
}

impl FlakyDatabase {
    pub fn new() -> Self {
        Self {
            inner: SqliteVecDatabase::open_in_memory().unwrap(),
            fail_creates: AtomicBool::new(false),
        }
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorDatabase for FlakyDatabase {
    async fn table_names(&self) -> Result<Vec<String>> {
        self.inner.table_names().await
    }

    async fn create_empty_table(&self, name: &str, schema: &TableSchema) -> Result<()> {
        if self.fail_creates.load(Ordering::SeqCst) {
            bail!("simulated failure creating '{}'", name);
        }
        self.inner.create_empty_table(name, schema).await
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        self.inner.drop_table(name).await
    }

    async fn add(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        self.inner.add(table, rows).await
    }

    async fn search(&self, table: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        self.inner.search(table, vector, limit).await
    }

    async fn query(&self, table: &str, filter: RowFilter) -> Result<Vec<Fields>> {
        self.inner.query(table, filter).await
    }
}
