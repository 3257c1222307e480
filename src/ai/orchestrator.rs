//! Turn orchestration.
//!
//! One turn is: retrieve memories for the latest user message, call the model
//! once, then run the tasks and actions it asked for until nothing is left,
//! the depth ceiling is reached, or the turn times out.
//!
//! Tasks returned by any step run immediately, ahead of later work; actions go
//! to the [`WorkQueue`] and run once no tasks are pending. Both share one depth
//! counter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::context::{AssistantContext, ExecutionContext, ExecutionOptions, TurnParams};
use super::error::{ExecutionError, Result, ToolExecutionError, TurnError};
use super::events::TurnEvent;
use super::llm_client::{ChatOptions, ChatProvider};
use super::prompt::{build_messages, format_memory_block, normalize_tool_result, parse_model_response};
use super::state::StateStore;
use super::tools::ToolRegistry;
use super::types::{is_empty_patch, last_user_message, Action, ChatMessage, ExecutionResult, Task};
use super::work_queue::WorkQueue;
use crate::memory::types::{MemoryQueryResult, QueryOptions};
use crate::memory::MemoryStore;

/// Tools whose arguments are redacted from errors when no list is configured.
pub const DEFAULT_SENSITIVE_TOOLS: &[&str] = &["remember"];

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub execution_id: String,
    /// The model's reply to the user
    pub response: String,
    /// Final merged state, plus any work left unprocessed (none on success)
    pub result: ExecutionResult,
    pub memory_items_included: usize,
    /// Tasks and actions executed
    pub depth: usize,
    /// Step failures that were recorded instead of aborting the turn
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

/// Mutable bookkeeping for one turn.
///
/// Lives outside the timed future so it survives a timeout.
struct TurnRun {
    ctx: ExecutionContext,
    queue: WorkQueue,
    pending_tasks: VecDeque<Task>,
    errors: Vec<String>,
    response: String,
    memory_items_included: usize,
}

/// A failed step, before the fail-fast policy is applied.
enum StepFailure {
    Task { tool: String, error: TurnError },
    Action { action: Action, error: TurnError },
}

/// Drives conversational turns against injected collaborators.
pub struct TurnOrchestrator {
    chat: Arc<dyn ChatProvider>,
    tools: Arc<dyn ToolRegistry>,
    state: Arc<dyn StateStore>,
    memory: Arc<MemoryStore>,
    sensitive_tools: Vec<String>,
    event_tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl TurnOrchestrator {
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        tools: Arc<dyn ToolRegistry>,
        state: Arc<dyn StateStore>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        Self {
            chat,
            tools,
            state,
            memory,
            sensitive_tools: DEFAULT_SENSITIVE_TOOLS.iter().map(|s| s.to_string()).collect(),
            event_tx: None,
        }
    }

    /// Replace the list of tools whose arguments are redacted.
    pub fn with_sensitive_tools(mut self, tools: Vec<String>) -> Self {
        self.sensitive_tools = tools;
        self
    }

    pub fn with_event_sender(mut self, event_tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn is_sensitive(&self, tool: &str) -> bool {
        self.sensitive_tools.iter().any(|t| t == tool) || self.tools.is_sensitive(tool)
    }

    /// Run one turn.
    pub async fn execute(
        &self,
        messages: Vec<ChatMessage>,
        params: TurnParams,
        options: ExecutionOptions,
    ) -> std::result::Result<TurnOutcome, ExecutionError> {
        let mut run = TurnRun {
            ctx: ExecutionContext::new(options),
            queue: WorkQueue::new(),
            pending_tasks: VecDeque::new(),
            errors: Vec::new(),
            response: String::new(),
            memory_items_included: 0,
        };
        let execution_id = run.ctx.id.clone();
        let timeout_ms = run.ctx.options.timeout_ms;

        tracing::info!(
            execution_id = %execution_id,
            session_id = %params.session_id,
            "Starting turn"
        );
        self.emit(TurnEvent::TurnStarted {
            execution_id: execution_id.clone(),
            session_id: params.session_id.clone(),
        });

        let outcome = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.run_turn(&mut run, &messages, &params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TurnError::Timeout { timeout_ms }),
        };

        // Work never outlives its turn.
        let leftover = run.queue.len() + run.pending_tasks.len();
        run.queue.clear();
        run.pending_tasks.clear();

        let elapsed_ms = run.ctx.elapsed_ms();
        match outcome {
            Ok(()) => {
                tracing::info!(
                    execution_id = %execution_id,
                    depth = run.ctx.depth,
                    elapsed_ms,
                    "Turn completed"
                );
                self.emit(TurnEvent::TurnCompleted {
                    execution_id: execution_id.clone(),
                    depth: run.ctx.depth,
                    duration_ms: elapsed_ms,
                });

                if let Some(prompt) = last_user_message(&messages) {
                    self.spawn_fact_extraction(&params.session_id, prompt, &run.response);
                }

                Ok(TurnOutcome {
                    execution_id,
                    response: run.response,
                    result: ExecutionResult::with_state(self.state.get_state().await),
                    memory_items_included: run.memory_items_included,
                    depth: run.ctx.depth,
                    errors: run.errors,
                    elapsed_ms,
                })
            }
            Err(error) => {
                tracing::error!(
                    execution_id = %execution_id,
                    depth = run.ctx.depth,
                    discarded = leftover,
                    "Turn failed: {}",
                    error
                );
                self.emit(TurnEvent::TurnError {
                    execution_id: execution_id.clone(),
                    message: error.to_string(),
                    error_type: error.kind().to_string(),
                });
                Err(ExecutionError {
                    execution_id,
                    elapsed_ms,
                    options: run.ctx.options,
                    last_prompt: last_user_message(&messages).map(str::to_string),
                    source: error,
                })
            }
        }
    }

    async fn run_turn(
        &self,
        run: &mut TurnRun,
        messages: &[ChatMessage],
        params: &TurnParams,
    ) -> Result<()> {
        let memories = match last_user_message(messages) {
            Some(prompt) => self.retrieve_memories(prompt, params, &run.ctx.id).await,
            None => Vec::new(),
        };
        run.memory_items_included = memories.len();
        self.emit(TurnEvent::MemoryRetrieved {
            execution_id: run.ctx.id.clone(),
            count: memories.len(),
        });

        let memory_block = format_memory_block(&memories);
        let prompt = build_messages(
            params.system_prompt.as_deref(),
            &self.tools.tool_names(),
            memory_block.as_deref(),
            messages,
        );
        let chat_options = chat_options(params);

        tracing::debug!(
            execution_id = %run.ctx.id,
            provider = self.chat.provider_name(),
            "Calling model with {} messages",
            prompt.len()
        );
        let reply = self
            .chat
            .chat(&prompt, &chat_options)
            .await
            .map_err(TurnError::Model)?;
        let reply = parse_model_response(&reply.content);
        run.response = reply.response;

        let assistant = AssistantContext {
            session_id: params.session_id.clone(),
            execution_id: run.ctx.id.clone(),
            memory: self.memory.clone(),
        };
        self.absorb(run, reply.result).await?;
        self.drain(run, &assistant, params).await
    }

    /// Memories for `prompt` within the relevance threshold. Failures only
    /// cost the turn its memories.
    async fn retrieve_memories(
        &self,
        prompt: &str,
        params: &TurnParams,
        execution_id: &str,
    ) -> Vec<MemoryQueryResult> {
        let options = QueryOptions {
            session_limit: params.memory_session_limit,
            persistent_limit: params.memory_persistent_limit,
        };
        let result = match self.memory.initialize(&params.session_id).await {
            Ok(()) => {
                self.memory
                    .query_memories(prompt, &params.session_id, options)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(memories) => {
                let total = memories.len();
                let relevant: Vec<MemoryQueryResult> = memories
                    .into_iter()
                    .filter(|m| m.score <= params.memory_relevance_threshold)
                    .collect();
                tracing::debug!(
                    execution_id = %execution_id,
                    "Including {} of {} retrieved memories",
                    relevant.len(),
                    total
                );
                relevant
            }
            Err(e) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    "Memory retrieval failed, continuing without memories: {}",
                    e
                );
                Vec::new()
            }
        }
    }

    /// Run pending tasks and queued actions until both are empty.
    async fn drain(
        &self,
        run: &mut TurnRun,
        assistant: &AssistantContext,
        params: &TurnParams,
    ) -> Result<()> {
        loop {
            if let Some(task) = run.pending_tasks.pop_front() {
                check_depth(&run.ctx)?;
                let outcome = self.run_task(&task, assistant).await;
                run.ctx.depth += 1;
                match outcome {
                    Ok(result) => {
                        tracing::debug!(
                            execution_id = %run.ctx.id,
                            tool = %task.tool,
                            depth = run.ctx.depth,
                            "Task executed"
                        );
                        self.emit(TurnEvent::TaskExecuted {
                            execution_id: run.ctx.id.clone(),
                            tool: task.tool.clone(),
                            depth: run.ctx.depth,
                        });
                        self.absorb(run, result).await?;
                    }
                    Err(error) => {
                        self.recover(run, StepFailure::Task { tool: task.tool, error })?;
                    }
                }
                continue;
            }

            let Some(action) = run.queue.pop() else {
                return Ok(());
            };
            check_depth(&run.ctx)?;
            let outcome = self.run_action(&action, assistant, params).await;
            run.ctx.depth += 1;
            match outcome {
                Ok(result) => {
                    tracing::debug!(
                        execution_id = %run.ctx.id,
                        action_id = %action.id,
                        action_type = %action.action_type,
                        depth = run.ctx.depth,
                        "Action executed"
                    );
                    self.emit(TurnEvent::ActionExecuted {
                        execution_id: run.ctx.id.clone(),
                        action_id: action.id.clone(),
                        action_type: action.action_type.clone(),
                        depth: run.ctx.depth,
                    });
                    self.absorb(run, result).await?;
                }
                Err(error) => {
                    self.recover(run, StepFailure::Action { action, error })?;
                }
            }
        }
    }

    /// Merge a step's state and schedule its follow-up work.
    async fn absorb(&self, run: &mut TurnRun, result: ExecutionResult) -> Result<()> {
        if !is_empty_patch(&result.state) {
            self.state
                .update_state(result.state.clone())
                .await
                .map_err(TurnError::State)?;
            self.emit(TurnEvent::StateUpdated {
                execution_id: run.ctx.id.clone(),
                patch: result.state,
            });
        }

        // Nested tasks run before anything already pending.
        for task in result.tasks.into_iter().rev() {
            run.pending_tasks.push_front(task);
        }
        for action in result.actions {
            run.queue.add_with_priority(action);
        }
        Ok(())
    }

    /// Report the failure, then abort on `fail_fast` or record it and carry on.
    fn recover(&self, run: &mut TurnRun, failure: StepFailure) -> Result<()> {
        let (error, event) = match failure {
            StepFailure::Task { tool, error } => {
                let event = TurnEvent::TaskError {
                    execution_id: run.ctx.id.clone(),
                    tool,
                    message: error.to_string(),
                };
                (error, event)
            }
            StepFailure::Action { action, error } => {
                let event = TurnEvent::ActionError {
                    execution_id: run.ctx.id.clone(),
                    action_id: action.id,
                    action_type: action.action_type,
                    message: error.to_string(),
                };
                (error, event)
            }
        };

        self.emit(event);
        if run.ctx.options.fail_fast {
            return Err(error);
        }
        tracing::warn!(execution_id = %run.ctx.id, "Step failed, continuing: {}", error);
        run.errors.push(error.to_string());
        Ok(())
    }

    async fn run_task(&self, task: &Task, assistant: &AssistantContext) -> Result<ExecutionResult> {
        self.invoke_tool(&task.tool, task.params.clone(), assistant).await
    }

    async fn invoke_tool(
        &self,
        tool: &str,
        params: Value,
        assistant: &AssistantContext,
    ) -> Result<ExecutionResult> {
        let sensitive = self.is_sensitive(tool);
        let value = self
            .tools
            .execute_tool(tool, params.clone(), Some(assistant))
            .await
            .map_err(|e| ToolExecutionError::new(tool, &params, sensitive, e))?;
        normalize_tool_result(tool, value)
            .map_err(|e| ToolExecutionError::new(tool, &params, sensitive, e).into())
    }

    async fn run_action(
        &self,
        action: &Action,
        assistant: &AssistantContext,
        params: &TurnParams,
    ) -> Result<ExecutionResult> {
        match action.action_type.as_str() {
            "tool" | "tool_call" => {
                let tool = action
                    .data
                    .get("tool")
                    .and_then(Value::as_str)
                    .ok_or_else(|| action_error(action, "missing 'tool' in action data"))?;
                let tool_params = action
                    .data
                    .get("params")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                self.invoke_tool(tool, tool_params, assistant).await
            }
            "prompt" | "chain_prompt" => {
                let prompt = action
                    .data
                    .get("prompt")
                    .and_then(Value::as_str)
                    .ok_or_else(|| action_error(action, "missing 'prompt' in action data"))?;
                let messages = build_messages(
                    params.system_prompt.as_deref(),
                    &self.tools.tool_names(),
                    None,
                    &[ChatMessage::user(prompt)],
                );
                let reply = self
                    .chat
                    .chat(&messages, &chat_options(params))
                    .await
                    .map_err(|e| action_error(action, &format!("{:#}", e)))?;
                Ok(parse_model_response(&reply.content).result)
            }
            other => self.invoke_tool(other, action.data.clone(), assistant).await,
        }
    }

    /// Store facts from the reply in the background.
    fn spawn_fact_extraction(&self, session_id: &str, prompt: &str, response: &str) {
        if response.trim().is_empty() {
            return;
        }
        let memory = self.memory.clone();
        let session_id = session_id.to_string();
        let prompt = prompt.to_string();
        let response = response.to_string();
        tokio::spawn(async move {
            match memory
                .process_and_store_turn(&session_id, &prompt, &response)
                .await
            {
                Ok(0) => {}
                Ok(count) => tracing::debug!(session_id = %session_id, "Stored {} facts", count),
                Err(e) => tracing::warn!(session_id = %session_id, "Fact extraction failed: {}", e),
            }
        });
    }
}

fn check_depth(ctx: &ExecutionContext) -> Result<()> {
    if ctx.depth_exhausted() {
        return Err(TurnError::MaxDepth {
            max_depth: ctx.options.max_depth,
        });
    }
    Ok(())
}

fn action_error(action: &Action, message: &str) -> TurnError {
    TurnError::Action {
        action_id: action.id.clone(),
        action_type: action.action_type.clone(),
        message: message.to_string(),
    }
}

fn chat_options(params: &TurnParams) -> ChatOptions {
    match params.temperature {
        Some(temperature) => ChatOptions::default().with_temperature(temperature),
        None => ChatOptions::default(),
    }
}
