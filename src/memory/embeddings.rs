//! Embedding providers.
//!
//! The memory store only needs two things from a model: the dimension of the
//! vectors it produces, and a batch `embed` call. [`FastEmbedProvider`] is the
//! local ONNX implementation used in production.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::RwLock;

use super::config::MemoryConfig;

/// Source of text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of the vectors this provider produces, if known.
    fn dimension(&self) -> Option<usize>;

    /// Load the model ahead of the first `embed` call.
    async fn load(&self) -> Result<()> {
        Ok(())
    }

    /// Embed a batch of texts, one vector per input in order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

/// fastembed-backed provider (lazy loaded).
pub struct FastEmbedProvider {
    model: EmbeddingModel,
    model_code: String,
    cache_dir: PathBuf,
    show_download_progress: bool,
    embedding: Arc<RwLock<Option<TextEmbedding>>>,
}

impl FastEmbedProvider {
    /// Create a provider for the configured model code.
    ///
    /// Fails if fastembed doesn't know the model.
    pub fn new(config: &MemoryConfig) -> Result<Self> {
        let model = EmbeddingModel::from_str(&config.embedding_model)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Unsupported embedding model '{}'", config.embedding_model))?;

        Ok(Self {
            model,
            model_code: config.embedding_model.clone(),
            cache_dir: config.models_dir.clone(),
            show_download_progress: config.show_download_progress,
            embedding: Arc::new(RwLock::new(None)),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.embedding.read().is_some()
    }

    fn init_blocking(
        slot: &RwLock<Option<TextEmbedding>>,
        model: EmbeddingModel,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<()> {
        let mut guard = slot.write();
        if guard.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create models directory {:?}", cache_dir))?;

        tracing::info!("Initializing embedding model ({:?})...", model);

        // fastembed downloads the model on first use
        let options = InitOptions::new(model)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(show_download_progress);
        let embedding =
            TextEmbedding::try_new(options).context("Failed to initialize embedding model")?;

        *guard = Some(embedding);
        tracing::info!("Embedding model initialized successfully");
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn dimension(&self) -> Option<usize> {
        TextEmbedding::get_model_info(&self.model)
            .ok()
            .map(|info| info.dim)
    }

    async fn load(&self) -> Result<()> {
        let slot = Arc::clone(&self.embedding);
        let model = self.model.clone();
        let cache_dir = self.cache_dir.clone();
        let show = self.show_download_progress;
        tokio::task::spawn_blocking(move || Self::init_blocking(&slot, model, cache_dir, show))
            .await
            .context("Embedding model loader task failed")?
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !self.is_loaded() {
            self.load().await?;
        }

        let slot = Arc::clone(&self.embedding);
        tokio::task::spawn_blocking(move || {
            let guard = slot.read();
            let model = guard.as_ref().context("Embedding model not initialized")?;
            model
                .embed(texts, None)
                .context("Failed to generate embeddings")
        })
        .await
        .context("Embedding task failed")?
    }

    fn name(&self) -> &str {
        &self.model_code
    }
}
