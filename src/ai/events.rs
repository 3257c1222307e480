use serde::{Deserialize, Serialize};

/// Observable moments of a turn.
///
/// Sent on the orchestrator's optional event channel; every variant carries
/// the execution id so consumers can correlate with logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Turn accepted and context created
    TurnStarted {
        execution_id: String,
        session_id: String,
    },

    /// Memories were retrieved for the prompt
    MemoryRetrieved {
        execution_id: String,
        count: usize,
    },

    /// A state patch was merged
    StateUpdated {
        execution_id: String,
        patch: serde_json::Value,
    },

    /// A task ran successfully
    TaskExecuted {
        execution_id: String,
        tool: String,
        depth: usize,
    },

    /// A task failed (the turn may continue)
    TaskError {
        execution_id: String,
        tool: String,
        message: String,
    },

    /// A queued action ran successfully
    ActionExecuted {
        execution_id: String,
        action_id: String,
        action_type: String,
        depth: usize,
    },

    /// A queued action failed (the turn may continue)
    ActionError {
        execution_id: String,
        action_id: String,
        action_type: String,
        message: String,
    },

    /// Turn finished
    TurnCompleted {
        execution_id: String,
        depth: usize,
        duration_ms: u64,
    },

    /// Turn aborted
    TurnError {
        execution_id: String,
        message: String,
        error_type: String,
    },
}

impl TurnEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            TurnEvent::TurnStarted { execution_id, .. }
            | TurnEvent::MemoryRetrieved { execution_id, .. }
            | TurnEvent::StateUpdated { execution_id, .. }
            | TurnEvent::TaskExecuted { execution_id, .. }
            | TurnEvent::TaskError { execution_id, .. }
            | TurnEvent::ActionExecuted { execution_id, .. }
            | TurnEvent::ActionError { execution_id, .. }
            | TurnEvent::TurnCompleted { execution_id, .. }
            | TurnEvent::TurnError { execution_id, .. } => execution_id,
        }
    }
}
