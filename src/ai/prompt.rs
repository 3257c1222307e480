//! Prompt assembly and model-reply parsing.

use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{Action, ChatMessage, ExecutionResult, Role, Task};
use crate::memory::facts::strip_code_fence;
use crate::memory::types::{MemoryQueryResult, MemorySource, MemoryType};

/// Base instructions when the caller supplies no system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with long-term memory.

Reply in plain text, or, when you need tools, with a single JSON object:
{
  "response": "text shown to the user",
  "state": { ...fields to merge into the conversation state... },
  "tasks": [ { "tool": "<tool name>", "params": { ... } } ],
  "actions": [ { "type": "tool" | "prompt" | "<tool name>", "data": { ... } } ]
}
Tasks run immediately in order. Actions are queued and run after all tasks."#;

/// Keys that mark a JSON object as an execution result.
const RESULT_KEYS: [&str; 3] = ["state", "tasks", "actions"];

/// Render retrieved memories as a prompt block, or `None` if there are none.
pub fn format_memory_block(memories: &[MemoryQueryResult]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }

    let mut block = String::from("Relevant memories (most relevant first):");
    for memory in memories {
        let origin = match (&memory.memory_type, &memory.source) {
            (MemoryType::Session, MemorySource::Label(label)) => format!("session/{}", label),
            (MemoryType::Session, MemorySource::Ids(_)) => "session".to_string(),
            (MemoryType::Persistent, _) => "long-term".to_string(),
        };
        block.push_str(&format!("\n- [{}] {}", origin, memory.text));
    }
    Some(block)
}

/// Full message list for the turn's model call.
pub fn build_messages(
    system_prompt: Option<&str>,
    tool_names: &[String],
    memory_block: Option<&str>,
    messages: &[ChatMessage],
) -> Vec<ChatMessage> {
    let mut system = system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string();
    if !tool_names.is_empty() {
        system.push_str("\n\nAvailable tools: ");
        system.push_str(&tool_names.join(", "));
    }
    if let Some(block) = memory_block {
        system.push_str("\n\n");
        system.push_str(block);
    }

    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage::system(system));
    out.extend(messages.iter().filter(|m| m.role != Role::System).cloned());
    out
}

#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    state: Option<Value>,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    actions: Vec<Action>,
}

/// A parsed model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    /// Text for the user
    pub response: String,
    pub result: ExecutionResult,
}

/// Interpret a model reply.
///
/// A JSON object (optionally fenced) with any of `response`, `state`,
/// `tasks` or `actions` is structured. Anything else is plain text and
/// becomes `{ "last_response": text }`.
pub fn parse_model_response(content: &str) -> ModelReply {
    let trimmed = content.trim();
    let body = strip_code_fence(trimmed);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let structured = map.contains_key("response") || RESULT_KEYS.iter().any(|k| map.contains_key(*k));
        if structured {
            match serde_json::from_value::<StructuredReply>(Value::Object(map)) {
                Ok(reply) => {
                    let response = reply.response.unwrap_or_default();
                    let state = match reply.state {
                        Some(state) => state,
                        None if !response.is_empty() => json!({ "last_response": response }),
                        None => Value::Null,
                    };
                    return ModelReply {
                        response,
                        result: ExecutionResult {
                            state,
                            tasks: reply.tasks,
                            actions: reply.actions,
                        },
                    };
                }
                Err(e) => {
                    tracing::warn!("Malformed structured reply, treating as text: {}", e);
                }
            }
        }
    }

    ModelReply {
        response: trimmed.to_string(),
        result: ExecutionResult::with_state(json!({ "last_response": trimmed })),
    }
}

/// Turn a tool's return value into an [`ExecutionResult`].
///
/// Objects carrying `state`, `tasks` or `actions` are taken as results
/// directly; any other value is recorded under `tool_results.<tool>`.
pub fn normalize_tool_result(tool: &str, value: Value) -> anyhow::Result<ExecutionResult> {
    let is_result = value
        .as_object()
        .map(|map| RESULT_KEYS.iter().any(|k| map.contains_key(*k)))
        .unwrap_or(false);

    if is_result {
        return serde_json::from_value(value)
            .map_err(|e| anyhow::anyhow!("Tool '{}' returned a malformed result: {}", tool, e));
    }

    Ok(ExecutionResult::with_state(
        json!({ "tool_results": { tool: value } }),
    ))
}
