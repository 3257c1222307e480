//! Pending-action queue for a single turn.
//!
//! Actions are drained strictly in insertion order. [`WorkQueue::add_with_priority`]
//! places an action ahead of every lower-priority one while keeping insertion
//! order among equal priorities. The orchestrator owns the queue for the
//! duration of a turn, so there is no internal locking.

use std::collections::VecDeque;

use serde_json::Value;

use super::types::Action;

/// Partial update for a queued action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPatch {
    pub action_type: Option<String>,
    pub data: Option<Value>,
    pub priority: Option<i32>,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    items: VecDeque<Action>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the back.
    pub fn add(&mut self, action: Action) {
        self.items.push_back(action);
    }

    /// Append several actions, keeping their order.
    pub fn add_batch(&mut self, actions: impl IntoIterator<Item = Action>) {
        self.items.extend(actions);
    }

    /// Insert after every action with priority >= this one.
    pub fn add_with_priority(&mut self, action: Action) {
        let index = self
            .items
            .iter()
            .position(|queued| queued.priority < action.priority)
            .unwrap_or(self.items.len());
        self.items.insert(index, action);
    }

    /// Next action, or `None` when empty.
    pub fn pop(&mut self) -> Option<Action> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&Action> {
        self.items.front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Remove the action with `id`, returning it.
    pub fn remove(&mut self, id: &str) -> Option<Action> {
        let index = self.items.iter().position(|a| a.id == id)?;
        self.items.remove(index)
    }

    /// Apply `patch` to the action with `id`. Returns false if not queued.
    ///
    /// Changing the priority does not move the action.
    pub fn update(&mut self, id: &str, patch: ActionPatch) -> bool {
        let Some(action) = self.items.iter_mut().find(|a| a.id == id) else {
            return false;
        };
        if let Some(action_type) = patch.action_type {
            action.action_type = action_type;
        }
        if let Some(data) = patch.data {
            action.data = data;
        }
        if let Some(priority) = patch.priority {
            action.priority = priority;
        }
        true
    }

    /// Take every queued action in order.
    pub fn drain_all(&mut self) -> Vec<Action> {
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
