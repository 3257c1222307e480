//! Wiring of the default collaborators from settings.

use std::sync::Arc;

use anyhow::Context;

use crate::ai::{
    ChatMessage, ChatProvider, ExecutionOptions, InMemoryStateStore, InMemoryToolRegistry,
    OpenAiCompatibleChat, TurnOrchestrator, TurnOutcome, TurnParams,
};
use crate::error::{EngramError, Result};
use crate::logging::init_tracing;
use crate::memory::{EmbeddingProvider, FastEmbedProvider, MemoryConfig, MemoryStore};
use crate::settings::{EngramSettings, SettingsManager};

/// A ready-to-run orchestrator and the memory store behind it.
pub struct EngramState {
    pub settings: EngramSettings,
    pub memory: Arc<MemoryStore>,
    pub tools: Arc<InMemoryToolRegistry>,
    pub orchestrator: TurnOrchestrator,
}

impl EngramState {
    /// Load `~/.engram/settings.toml` (writing the template on first run),
    /// install logging and build the default stack.
    pub async fn bootstrap() -> Result<Self> {
        let manager = SettingsManager::new();
        if let Err(e) = manager.ensure_settings_file().await {
            tracing::warn!("Failed to create settings template: {}", e);
        }

        let settings = manager
            .load()
            .await
            .context("Failed to load settings")
            .map_err(EngramError::Settings)?;
        init_tracing(&settings.logging.level);
        tracing::info!("Settings loaded from {}", manager.path().display());

        Self::from_settings(settings)
    }

    /// fastembed embeddings and the configured OpenAI-compatible endpoint.
    pub fn from_settings(settings: EngramSettings) -> Result<Self> {
        let config = MemoryConfig::from(&settings.memory);
        let embedder = FastEmbedProvider::new(&config).map_err(EngramError::Init)?;
        let chat = OpenAiCompatibleChat::new(&settings.llm).map_err(EngramError::Init)?;
        Ok(Self::with_collaborators(
            settings,
            config,
            Arc::new(embedder),
            Arc::new(chat),
        ))
    }

    /// Build the stack around caller-supplied providers.
    pub fn with_collaborators(
        settings: EngramSettings,
        config: MemoryConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
    ) -> Self {
        let memory = Arc::new(MemoryStore::new(config, embedder).with_chat_provider(chat.clone()));
        let tools = Arc::new(InMemoryToolRegistry::with_memory_tools());
        let orchestrator = TurnOrchestrator::new(
            chat,
            tools.clone(),
            Arc::new(InMemoryStateStore::new()),
            memory.clone(),
        )
        .with_sensitive_tools(settings.orchestrator.sensitive_tools.clone());

        Self {
            settings,
            memory,
            tools,
            orchestrator,
        }
    }

    /// Run a turn with the configured limits.
    pub async fn execute(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<TurnOutcome> {
        let params = TurnParams::from_settings(session_id, &self.settings.memory);
        let options = ExecutionOptions::from(&self.settings.orchestrator);
        Ok(self.orchestrator.execute(messages, params, options).await?)
    }
}
