//! Turn orchestration.
//!
//! [`TurnOrchestrator`] runs one conversational turn against injected
//! collaborators: a [`ChatProvider`], a [`ToolRegistry`], a [`StateStore`]
//! and the shared [`MemoryStore`](crate::memory::MemoryStore).

pub mod context;
pub mod error;
pub mod events;
pub mod llm_client;
pub mod orchestrator;
pub mod prompt;
pub mod state;
pub mod tools;
pub mod types;
pub mod work_queue;

#[cfg(test)]
mod integration_tests;

pub use context::{AssistantContext, ExecutionContext, ExecutionOptions, TurnParams};
pub use error::{ExecutionError, ToolExecutionError, TurnError};
pub use events::TurnEvent;
pub use llm_client::{ChatOptions, ChatProvider, ChatResponse, OpenAiCompatibleChat};
pub use orchestrator::{TurnOrchestrator, TurnOutcome};
pub use state::{InMemoryStateStore, StateStore};
pub use tools::{FnTool, InMemoryToolRegistry, RecallTool, RememberTool, Tool, ToolRegistry};
pub use types::{Action, ChatMessage, ExecutionResult, Role, Task};
pub use work_queue::{ActionPatch, WorkQueue};
