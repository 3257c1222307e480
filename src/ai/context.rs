//! Per-turn execution context and options.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::MemoryStore;
use crate::settings::schema::{MemorySettings, OrchestratorSettings};

/// Default ceiling on tasks plus actions per turn.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Default turn timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Caller-supplied limits for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// Abort the turn on the first tool or action error
    #[serde(default)]
    pub fail_fast: bool,

    /// Maximum number of tasks and actions executed
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Wall-clock budget for the whole turn
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Free-form values passed through untouched
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            fail_fast: false,
            max_depth: default_max_depth(),
            timeout_ms: default_timeout_ms(),
            extensions: Map::new(),
        }
    }
}

impl From<&OrchestratorSettings> for ExecutionOptions {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            fail_fast: settings.fail_fast,
            max_depth: settings.max_depth,
            timeout_ms: settings.timeout_ms,
            extensions: Map::new(),
        }
    }
}

impl ExecutionOptions {
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Memory and prompt parameters for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnParams {
    pub session_id: String,
    pub memory_session_limit: usize,
    pub memory_persistent_limit: usize,
    /// Memories with a distance above this are dropped.
    pub memory_relevance_threshold: f32,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
}

impl TurnParams {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            memory_session_limit: 10,
            memory_persistent_limit: 20,
            memory_relevance_threshold: 0.5,
            system_prompt: None,
            temperature: None,
        }
    }

    /// Limits and threshold from settings.
    pub fn from_settings(session_id: impl Into<String>, settings: &MemorySettings) -> Self {
        Self {
            memory_session_limit: settings.session_limit,
            memory_persistent_limit: settings.persistent_limit,
            memory_relevance_threshold: settings.relevance_threshold,
            ..Self::new(session_id)
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_memory_limits(mut self, session: usize, persistent: usize) -> Self {
        self.memory_session_limit = session;
        self.memory_persistent_limit = persistent;
        self
    }

    pub fn with_relevance_threshold(mut self, threshold: f32) -> Self {
        self.memory_relevance_threshold = threshold;
        self
    }
}

/// State of one running turn.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub id: String,
    pub start_time: Instant,
    /// Tasks and actions executed so far. Only ever increases.
    pub depth: usize,
    pub options: ExecutionOptions,
}

impl ExecutionContext {
    pub fn new(options: ExecutionOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_time: Instant::now(),
            depth: 0,
            options,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn depth_exhausted(&self) -> bool {
        self.depth >= self.options.max_depth
    }
}

/// Handles given to tools invoked from queued actions.
#[derive(Clone)]
pub struct AssistantContext {
    pub session_id: String,
    pub execution_id: String,
    pub memory: Arc<MemoryStore>,
}

impl std::fmt::Debug for AssistantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantContext")
            .field("session_id", &self.session_id)
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}
