//! Errors raised while executing a turn.

use thiserror::Error;

use super::context::ExecutionOptions;

/// Placeholder for arguments of sensitive tools.
pub const REDACTED: &str = "[redacted]";

/// A tool invocation failed.
#[derive(Debug, Error)]
#[error("Tool '{tool}' failed: {source}")]
pub struct ToolExecutionError {
    pub tool: String,
    /// Arguments as passed, or [`REDACTED`] for sensitive tools
    pub args: serde_json::Value,
    #[source]
    pub source: anyhow::Error,
}

impl ToolExecutionError {
    pub fn new(
        tool: impl Into<String>,
        args: &serde_json::Value,
        sensitive: bool,
        source: anyhow::Error,
    ) -> Self {
        Self {
            tool: tool.into(),
            args: if sensitive {
                serde_json::Value::String(REDACTED.to_string())
            } else {
                args.clone()
            },
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Turn timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Maximum execution depth of {max_depth} reached")]
    MaxDepth { max_depth: usize },

    #[error(transparent)]
    Tool(#[from] ToolExecutionError),

    #[error("Action '{action_id}' ({action_type}) failed: {message}")]
    Action {
        action_id: String,
        action_type: String,
        message: String,
    },

    #[error("Model call failed: {0}")]
    Model(#[source] anyhow::Error),

    #[error("State update failed: {0}")]
    State(#[source] anyhow::Error),
}

impl TurnError {
    /// Short machine-readable kind, used in events.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::Timeout { .. } => "timeout",
            TurnError::MaxDepth { .. } => "max_depth",
            TurnError::Tool(_) => "tool",
            TurnError::Action { .. } => "action",
            TurnError::Model(_) => "model",
            TurnError::State(_) => "state",
        }
    }
}

/// Error surfaced by [`TurnOrchestrator::execute`](super::TurnOrchestrator::execute).
///
/// Carries enough context to correlate with logs.
#[derive(Debug, Error)]
#[error("Turn {execution_id} failed after {elapsed_ms}ms: {source}")]
pub struct ExecutionError {
    pub execution_id: String,
    pub elapsed_ms: u64,
    pub options: ExecutionOptions,
    /// Latest user message of the turn
    pub last_prompt: Option<String>,
    #[source]
    pub source: TurnError,
}

pub type Result<T> = std::result::Result<T, TurnError>;
