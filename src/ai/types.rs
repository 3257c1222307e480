//! Core value types shared by the orchestrator, tools and memory.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Content of the latest user message, if any.
pub fn last_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

/// A direct tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

impl Task {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
        }
    }
}

/// A queued unit of follow-up work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "new_action_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub data: Value,
    /// Ordering hint for priority insertion; higher runs first.
    #[serde(default)]
    pub priority: i32,
}

fn new_action_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Action {
    pub fn new(action_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: new_action_id(),
            action_type: action_type.into(),
            data,
            priority: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Outcome of any executable step: a state patch plus follow-up work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl ExecutionResult {
    pub fn with_state(state: Value) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Whether the result carries neither state nor follow-up work.
    pub fn is_empty(&self) -> bool {
        is_empty_patch(&self.state) && self.tasks.is_empty() && self.actions.is_empty()
    }
}

/// `null` and `{}` patches change nothing.
pub fn is_empty_patch(patch: &Value) -> bool {
    match patch {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
