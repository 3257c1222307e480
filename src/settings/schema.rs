//! Settings schema definitions for engram configuration.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with sensible defaults.

use serde::{Deserialize, Serialize};

use crate::memory::config::DEFAULT_EMBEDDING_MODEL;

/// Root settings structure.
///
/// Loaded from `~/.engram/settings.toml` with environment variable interpolation support.
/// Version field enables future migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngramSettings {
    /// Schema version for migrations
    pub version: u32,

    /// Memory store configuration
    pub memory: MemorySettings,

    /// Turn execution limits
    pub orchestrator: OrchestratorSettings,

    /// Chat model endpoint
    pub llm: LlmSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Directory for the vector database and ledger (default: ~/.engram/memory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,

    /// fastembed model code
    pub embedding_model: String,

    /// Where embedding models are cached (default: ~/.engram/models)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_cache_dir: Option<String>,

    /// Session memories included per turn
    pub session_limit: usize,

    /// Persistent memories included per turn
    pub persistent_limit: usize,

    /// Memories farther than this distance are left out of the prompt
    pub relevance_threshold: f32,
}

/// Turn orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Abort a turn on the first failing task or action
    pub fail_fast: bool,

    /// Maximum tasks plus actions per turn
    pub max_depth: usize,

    /// Turn timeout in milliseconds
    pub timeout_ms: u64,

    /// Tools whose arguments are redacted from errors
    pub sensitive_tools: Vec<String>,
}

/// OpenAI-compatible chat endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// API base URL, without the `/chat/completions` suffix
    pub base_url: String,

    /// Model name sent with each request
    pub model: String,

    /// API key (supports $ENV_VAR syntax, falls back to OPENAI_API_KEY)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sampling temperature for turn calls
    pub temperature: f32,

    /// Completion token cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is unset: "error" | "warn" | "info" | "debug" | "trace"
    pub level: String,
}

// =============================================================================
// Default implementations
// =============================================================================

impl Default for EngramSettings {
    fn default() -> Self {
        Self {
            version: 1,
            memory: MemorySettings::default(),
            orchestrator: OrchestratorSettings::default(),
            llm: LlmSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            storage_dir: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_cache_dir: None,
            session_limit: 10,
            persistent_limit: 20,
            relevance_threshold: 0.5,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            fail_fast: false,
            max_depth: 10,
            timeout_ms: 30_000,
            sensitive_tools: vec!["remember".to_string()],
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
