//! End-to-end turns against a real on-disk memory store.

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use super::context::{ExecutionOptions, TurnParams};
use super::orchestrator::TurnOrchestrator;
use super::state::InMemoryStateStore;
use super::tools::InMemoryToolRegistry;
use super::types::ChatMessage;
use crate::memory::types::{MemorySource, QueryOptions};
use crate::memory::{MemoryConfig, MemoryStore};
use crate::testing::{HashingEmbedder, ScriptedChat};

fn memory_store(temp_dir: &TempDir) -> MemoryStore {
    MemoryStore::new(
        MemoryConfig::test_config(temp_dir.path()),
        Arc::new(HashingEmbedder::new(384)),
    )
}

fn orchestrator(chat: Arc<ScriptedChat>, memory: Arc<MemoryStore>) -> TurnOrchestrator {
    TurnOrchestrator::new(
        chat,
        Arc::new(InMemoryToolRegistry::with_memory_tools()),
        Arc::new(InMemoryStateStore::new()),
        memory,
    )
}

fn lenient(session_id: &str) -> TurnParams {
    TurnParams::new(session_id).with_relevance_threshold(2.0)
}

#[tokio::test]
async fn test_remembered_text_reaches_next_turn() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let memory = Arc::new(memory_store(&temp_dir));
    let remember = json!({
        "response": "Noted.",
        "tasks": [{ "tool": "remember", "params": { "text": "the user loves roses in the garden" } }]
    })
    .to_string();
    let chat = Arc::new(ScriptedChat::new(vec![remember.as_str(), "Roses, I believe."]));
    let orchestrator = orchestrator(chat.clone(), memory.clone());

    let first = orchestrator
        .execute(
            vec![ChatMessage::user("remember that I love roses")],
            lenient("s"),
            ExecutionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(first.depth, 1);
    assert!(first.errors.is_empty());
    assert_eq!(first.result.state["tool_results"]["remember"], json!({ "stored": true }));

    let second = orchestrator
        .execute(
            vec![ChatMessage::user("which flowers are in the garden")],
            lenient("s"),
            ExecutionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(second.response, "Roses, I believe.");
    assert!(second.memory_items_included >= 1);

    let calls = chat.calls();
    assert!(calls[1].0[0]
        .content
        .contains("[session/explicit] the user loves roses in the garden"));
}

#[tokio::test]
async fn test_facts_extracted_after_turn() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let fact_chat = Arc::new(ScriptedChat::new(vec![r#"["User's birthday is March 3"]"#]));
    let memory = Arc::new(memory_store(&temp_dir).with_chat_provider(fact_chat.clone()));
    let chat = Arc::new(ScriptedChat::new(vec![
        "Happy early birthday! March 3 is coming up.",
    ]));

    orchestrator(chat, memory.clone())
        .execute(
            vec![ChatMessage::user("my birthday is March 3")],
            lenient("s"),
            ExecutionOptions::default(),
        )
        .await
        .unwrap();

    let options = QueryOptions {
        session_limit: 5,
        persistent_limit: 0,
    };
    let mut found = Vec::new();
    for _ in 0..100 {
        found = memory
            .query_memories("birthday", "s", options)
            .await
            .unwrap();
        if !found.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].text, "User's birthday is March 3");
    assert_eq!(
        found[0].source,
        MemorySource::Label("conversation_fact".to_string())
    );
    assert_eq!(fact_chat.calls().len(), 1);
}

#[tokio::test]
async fn test_committed_memory_survives_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    {
        let memory = Arc::new(memory_store(&temp_dir));
        let remember = json!({
            "actions": [{ "type": "remember", "data": { "text": "the invoice is due friday" } }]
        })
        .to_string();
        let chat = Arc::new(ScriptedChat::new(vec![remember.as_str()]));
        orchestrator(chat, memory.clone())
            .execute(
                vec![ChatMessage::user("note the invoice date")],
                lenient("a"),
                ExecutionOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(memory.commit_session_to_persistent("a").await.unwrap(), 1);
    }

    let memory = Arc::new(memory_store(&temp_dir));
    let chat = Arc::new(ScriptedChat::new(vec!["Friday."]));
    let outcome = orchestrator(chat.clone(), memory)
        .execute(
            vec![ChatMessage::user("when is the invoice due")],
            lenient("b"),
            ExecutionOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.memory_items_included, 1);
    assert!(chat.calls()[0].0[0]
        .content
        .contains("[long-term] the invoice is due friday"));
}
