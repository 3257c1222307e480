//! Tool registry and built-in memory tools.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{json, Value};

use super::context::AssistantContext;
use crate::memory::types::{QueryOptions, SessionItem, SOURCE_EXPLICIT};

/// A named capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Whether arguments must be kept out of errors and logs.
    fn is_sensitive(&self) -> bool {
        false
    }

    async fn execute(&self, params: Value, ctx: Option<&AssistantContext>) -> Result<Value>;
}

/// Dispatches tool calls by name.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn execute_tool(
        &self,
        name: &str,
        params: Value,
        ctx: Option<&AssistantContext>,
    ) -> Result<Value>;

    fn has_tool(&self, name: &str) -> bool;

    fn tool_names(&self) -> Vec<String>;

    fn is_sensitive(&self, _name: &str) -> bool {
        false
    }
}

/// [`ToolRegistry`] over registered [`Tool`] objects.
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `remember` and `recall`.
    pub fn with_memory_tools() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(RememberTool));
        registry.register(Arc::new(RecallTool));
        registry
    }

    /// Add or replace a tool.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().insert(name.clone(), tool).is_some() {
            tracing::debug!("Replaced tool '{}'", name);
        }
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }
}

#[async_trait]
impl ToolRegistry for InMemoryToolRegistry {
    async fn execute_tool(
        &self,
        name: &str,
        params: Value,
        ctx: Option<&AssistantContext>,
    ) -> Result<Value> {
        let Some(tool) = self.get(name) else {
            bail!("Unknown tool: {}", name);
        };
        tool.execute(params, ctx).await
    }

    fn has_tool(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn is_sensitive(&self, name: &str) -> bool {
        self.get(name).map(|t| t.is_sensitive()).unwrap_or(false)
    }
}

type ToolFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Tool built from an async closure.
pub struct FnTool {
    name: String,
    sensitive: bool,
    handler: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            sensitive: false,
            handler: Box::new(handler),
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    async fn execute(&self, params: Value, _ctx: Option<&AssistantContext>) -> Result<Value> {
        (self.handler)(params).await
    }
}

fn require_context<'a>(tool: &str, ctx: Option<&'a AssistantContext>) -> Result<&'a AssistantContext> {
    ctx.with_context(|| format!("Tool '{}' requires an assistant context", tool))
}

/// Stores `params.text` in session memory as an explicit memory.
pub struct RememberTool;

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn is_sensitive(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value, ctx: Option<&AssistantContext>) -> Result<Value> {
        let ctx = require_context(self.name(), ctx)?;
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .context("'text' is required")?;

        ctx.memory
            .add_session_items(&ctx.session_id, vec![SessionItem::new(text, SOURCE_EXPLICIT)])
            .await?;
        Ok(json!({ "stored": true }))
    }
}

/// Searches both memory tiers for `params.query`.
pub struct RecallTool;

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    async fn execute(&self, params: Value, ctx: Option<&AssistantContext>) -> Result<Value> {
        let ctx = require_context(self.name(), ctx)?;
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .context("'query' is required")?;
        let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(5) as usize;

        let results = ctx
            .memory
            .query_memories(
                query,
                &ctx.session_id,
                QueryOptions {
                    session_limit: limit,
                    persistent_limit: limit,
                },
            )
            .await?;
        let memories: Vec<Value> = results
            .into_iter()
            .take(limit)
            .map(|r| json!({ "text": r.text, "score": r.score, "type": r.memory_type }))
            .collect();
        Ok(json!({ "memories": memories }))
    }
}
