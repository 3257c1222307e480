//! Configuration for the memory store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::settings::schema::MemorySettings;

/// Default fastembed model code (all-MiniLM-L6-v2, 384 dimensions).
pub const DEFAULT_EMBEDDING_MODEL: &str = "Qdrant/all-MiniLM-L6-v2-onnx";

/// Configuration for the dual-tier memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding the vector database and the table ledger
    /// (defaults to ~/.engram/memory/)
    pub storage_dir: PathBuf,

    /// Directory where embedding models are cached (defaults to ~/.engram/models/)
    pub models_dir: PathBuf,

    /// fastembed model code used for embeddings
    pub embedding_model: String,

    /// Show model download progress on first use
    pub show_download_progress: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let engram_dir = home.join(".engram");

        Self {
            storage_dir: engram_dir.join("memory"),
            models_dir: engram_dir.join("models"),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            show_download_progress: true,
        }
    }
}

impl From<&MemorySettings> for MemoryConfig {
    fn from(settings: &MemorySettings) -> Self {
        let mut config = Self::default();
        if let Some(dir) = &settings.storage_dir {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(dir) = &settings.embedding_cache_dir {
            config.models_dir = PathBuf::from(dir);
        }
        config.embedding_model = settings.embedding_model.clone();
        config
    }
}

impl MemoryConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config for testing (uses temp directories)
    #[cfg(test)]
    pub fn test_config(temp_dir: &std::path::Path) -> Self {
        Self {
            storage_dir: temp_dir.join("memory"),
            models_dir: temp_dir.join("models"),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            show_download_progress: false,
        }
    }

    /// Set the storage directory
    pub fn with_storage_dir(mut self, path: PathBuf) -> Self {
        self.storage_dir = path;
        self
    }

    /// Set the models directory
    pub fn with_models_dir(mut self, path: PathBuf) -> Self {
        self.models_dir = path;
        self
    }

    /// Set the embedding model code
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Load config from file, or return default if file doesn't exist
    pub fn load_or_default(path: &std::path::Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse memory config: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read memory config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the SQLite vector database
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("memory.sqlite3")
    }

    /// Get the path to the table dimension ledger
    pub fn ledger_path(&self) -> PathBuf {
        self.storage_dir.join("table_dimensions.json")
    }
}
