//! Integration tests for the durable memory store
//!
//! Exercises the single-writer path and persistence across reopen.

use chrono::Utc;
use quartet_engine::db::{Database, MemoryNode, MemoryState, MemoryType};
use serde_json::json;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn node(id: &str, text: &str, importance: f64) -> MemoryNode {
    let now = Utc::now();
    MemoryNode {
        id: id.to_string(),
        content: json!({ "content": text }),
        memory_type: MemoryType::Semantic,
        importance,
        created_at: now,
        last_accessed: now,
        access_count: 1,
        tags: BTreeSet::from(["harmony".to_string()]),
        connections: vec!["other".to_string()],
        embedding: Some(vec![0.25, 0.5]),
        state: MemoryState::Active,
    }
}

#[tokio::test]
async fn test_rows_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("memory.db");

    {
        let db = Database::new(&db_path).await.unwrap();
        let store = db.memory_store();
        store.upsert(node("n1", "fifths and octaves", 0.9)).await.unwrap();
        db.close().await.unwrap();
    }

    let db = Database::new(&db_path).await.unwrap();
    let stored = db.memory_store().get("n1").await.unwrap().unwrap();

    assert_eq!(stored.searchable_text(), "fifths and octaves");
    assert_eq!(stored.memory_type, MemoryType::Semantic);
    assert_eq!(stored.connections, vec!["other".to_string()]);
    assert_eq!(stored.embedding, Some(vec![0.25, 0.5]));
    assert!(stored.tags.contains("harmony"));
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_upserts_of_same_id_are_serialized() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("memory.db")).await.unwrap();
    let store = db.memory_store();

    let writes = (0..10).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.upsert(node("same", "repeated", 0.5)).await })
    });
    let outcomes: Vec<_> = futures::future::join_all(writes)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.inserted).count(), 1);
    let mut counts: Vec<i64> = outcomes.iter().map(|o| o.access_count).collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=10).collect::<Vec<i64>>());

    let created: BTreeSet<_> = outcomes.iter().map(|o| o.created_at).collect();
    assert_eq!(created.len(), 1);

    assert_eq!(store.get("same").await.unwrap().unwrap().access_count, 10);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_search_orders_by_importance() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("memory.db")).await.unwrap();
    let store = db.memory_store();

    store.upsert(node("low", "spiral of growth", 0.2)).await.unwrap();
    store.upsert(node("high", "spiral galaxy", 0.95)).await.unwrap();
    store.upsert(node("mid", "spiral shell", 0.6)).await.unwrap();
    store.upsert(node("other", "straight line", 1.0)).await.unwrap();

    let ids: Vec<String> = store
        .search("spiral", 10)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, vec!["high", "mid", "low"]);

    let limited = store.search("spiral", 1).await.unwrap();
    assert_eq!(limited.len(), 1);

    // tags are searchable too
    assert_eq!(store.search("harmony", 10).await.unwrap().len(), 4);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_archived_rows_stay_searchable() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("memory.db")).await.unwrap();
    let store = db.memory_store();

    store.upsert(node("n1", "old lesson", 0.5)).await.unwrap();
    assert!(store.set_state("n1", MemoryState::Archived).await.unwrap());

    let hits = store.search("lesson", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].state, MemoryState::Archived);
    db.close().await.unwrap();
}
