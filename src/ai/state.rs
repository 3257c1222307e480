//! Shared conversation state.
//!
//! Steps of a turn never replace the state; they send patches that are merged
//! in with JSON merge-patch rules: objects merge key by key, `null` deletes a
//! key, anything else overwrites.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Store receiving state patches from a turn.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Merge `patch` into the state and return the merged result.
    async fn update_state(&self, patch: Value) -> Result<Value>;

    async fn get_state(&self) -> Value;
}

/// Apply a JSON merge patch to `target` in place.
pub fn merge_patch(target: &mut Value, patch: Value) {
    let patch_map = match patch {
        Value::Object(map) => map,
        other => {
            *target = other;
            return;
        }
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(&key);
            } else {
                merge_patch(target_map.entry(key).or_insert(Value::Null), value);
            }
        }
    }
}

/// Process-local [`StateStore`].
#[derive(Debug)]
pub struct InMemoryStateStore {
    state: RwLock<Value>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(Value::Object(Map::new())),
        }
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: Value) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn update_state(&self, patch: Value) -> Result<Value> {
        let mut state = self.state.write().await;
        merge_patch(&mut state, patch);
        Ok(state.clone())
    }

    async fn get_state(&self) -> Value {
        self.state.read().await.clone()
    }
}
