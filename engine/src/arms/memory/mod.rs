//! Memory arm
//!
//! Handles `memory_request` messages. The arm owns the durable
//! [`MemoryStore`] and an actor-owned [`MemoryCache`]. A store writes the
//! cache first and then awaits the durable upsert outside the actor, so a
//! slow write only holds up its own caller.
//!
//! Two failure policies differ on purpose and are covered by tests: a failed
//! upsert fails the `store` request even though the cache already holds the
//! node, while a failed access bump during `retrieve` is only logged.
//! Cancellation and the deadline still abort either one.
//!
//! After a successful write the cached copies take the durable row's
//! `access_count`, `created_at` and state, and `retrieve` reports the counts
//! the access bump returned.

pub mod cache;
pub mod content;

pub use cache::{CacheHandle, CacheStats, MemoryCache, ScoredMemory};
pub use content::{canonicalize, content_id, geometry_label, infer_tags};

use crate::config::MemoryConfig;
use crate::db::{MemoryNode, MemoryState, MemoryStore, MemoryType};
use crate::message_bus::{Event, MessageBus};
use async_trait::async_trait;
use chrono::Utc;
use sdk::{Arm, CallContext, EngineError, Message};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MEMORY_ARM: &str = "memory_arm";

/// Payload of a `memory_request` message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryRequest {
    Store {
        data: Value,
        #[serde(default)]
        context: Value,
    },
    Retrieve {
        query: String,
        #[serde(default)]
        context: Value,
    },
    Search {
        query: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    Archive {
        memory_id: String,
    },
    Stats,
}

/// What a successful store reports back
#[derive(Debug, Clone, PartialEq)]
pub struct StoreReceipt {
    pub memory_id: String,
    pub memory_type: MemoryType,
    pub tags: BTreeSet<String>,
    pub access_count: i64,
    pub inserted: bool,
}

pub struct MemoryArm {
    store: MemoryStore,
    cache: CacheHandle,
    config: MemoryConfig,
    bus: MessageBus,
}

impl MemoryArm {
    /// Start the cache actor; it stops with `shutdown`
    pub fn new(
        store: MemoryStore,
        config: MemoryConfig,
        bus: MessageBus,
        shutdown: CancellationToken,
    ) -> Self {
        let cache = CacheHandle::spawn(MemoryCache::new(config.episodic_capacity), shutdown);
        Self {
            store,
            cache,
            config,
            bus,
        }
    }

    pub fn store_handle(&self) -> &MemoryStore {
        &self.store
    }

    /// Build a node from `data`, cache it and persist it
    pub async fn store(
        &self,
        data: &Value,
        context: &Value,
        ctx: &CallContext,
    ) -> Result<StoreReceipt, EngineError> {
        let (node, key) = self.build_node(data, context)?;
        let memory_id = node.id.clone();
        let memory_type = node.memory_type;
        let tags = node.tags.clone();

        ctx.run(self.cache.insert(node.clone(), key)).await??;

        let outcome = ctx.run(self.store.upsert(node)).await?.inspect_err(|e| {
            warn!(
                "Memory {} cached but not persisted: {}",
                memory_id, e
            );
        })?;
        ctx.run(self.cache.reconcile(outcome.clone())).await??;

        debug!(
            "Stored {} memory {} (access_count {})",
            memory_type, memory_id, outcome.access_count
        );
        self.bus
            .publish(Event::MemoryStored {
                memory_id: memory_id.clone(),
                memory_type: memory_type.to_string(),
                access_count: outcome.access_count,
            })
            .await;

        Ok(StoreReceipt {
            memory_id,
            memory_type,
            tags,
            access_count: outcome.access_count,
            inserted: outcome.inserted,
        })
    }

    /// Cache matches first, then the durable store; every hit is touched
    pub async fn retrieve(
        &self,
        query: &str,
        ctx: &CallContext,
    ) -> Result<Vec<ScoredMemory>, EngineError> {
        let mut hits = ctx
            .run(self.cache.recall(query, self.config.recent_episodic_window))
            .await??;

        if hits.is_empty() {
            hits = ctx
                .run(self.store.search(query, self.config.retrieve_limit))
                .await??
                .into_iter()
                .map(|memory| ScoredMemory {
                    memory,
                    score: cache::STORED_SCORE,
                    source: "stored",
                })
                .collect();
        }
        hits.truncate(self.config.retrieve_limit);

        let mut ids: Vec<String> = hits.iter().map(|h| h.memory.id.clone()).collect();
        ids.sort_unstable();
        ids.dedup();
        match ctx.run(self.store.touch(ids)).await? {
            Ok(counts) => {
                for hit in hits.iter_mut() {
                    if let Some(count) = counts.get(&hit.memory.id) {
                        hit.memory.access_count = *count;
                    }
                }
                debug!("Recorded access for {} memories", counts.len());
            }
            Err(e) => warn!("Failed to record memory access: {}", e),
        }

        Ok(hits)
    }

    /// Move a memory to the archived state; false when unknown
    pub async fn archive(&self, memory_id: &str) -> Result<bool, EngineError> {
        let persisted = self.store.set_state(memory_id, MemoryState::Archived).await?;
        let cached = self.cache.set_state(memory_id, MemoryState::Archived).await?;
        if persisted {
            info!("Archived memory {}", memory_id);
        }
        Ok(persisted || cached)
    }

    pub async fn stats(&self) -> Result<Value, EngineError> {
        let cache = self.cache.stats().await?;
        let stored = self.store.count().await?;
        Ok(json!({
            "episodic": cache.episodic,
            "semantic_concepts": cache.semantic_concepts,
            "semantic_nodes": cache.semantic_nodes,
            "procedural": cache.procedural,
            "stored": stored,
        }))
    }

    /// Node for `data` plus its cache key (concept or skill)
    fn build_node(&self, data: &Value, context: &Value) -> Result<(MemoryNode, String), EngineError> {
        let Value::Object(fields) = data else {
            return Err(EngineError::InvalidPayload(
                "store data must be an object".to_string(),
            ));
        };

        let id = content_id(data);

        let text = fields
            .get("content")
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let title = fields.get("title").and_then(Value::as_str).unwrap_or("");

        let memory_type = fields
            .get("type")
            .or_else(|| context.get("type"))
            .and_then(Value::as_str)
            .map(str::parse::<MemoryType>)
            .transpose()?
            .unwrap_or(MemoryType::Episodic);

        let importance = fields
            .get("importance")
            .and_then(Value::as_f64)
            .unwrap_or(match memory_type {
                MemoryType::Episodic => 0.5,
                MemoryType::Semantic => 0.7,
                MemoryType::Procedural => 0.6,
            })
            .clamp(0.0, 1.0);

        let mut tags: BTreeSet<String> = fields
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let scan = format!("{} {}", title, text);
        tags.extend(infer_tags(&scan));
        tags.insert(format!("geometry:{}", geometry_label(&scan)));

        let key = match memory_type {
            MemoryType::Episodic => String::new(),
            MemoryType::Semantic => fields
                .get("concept")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    fields
                        .get("tags")
                        .and_then(Value::as_array)
                        .and_then(|t| t.first())
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .or_else(|| text.split_whitespace().next().map(str::to_lowercase))
                .unwrap_or_else(|| "general".to_string()),
            MemoryType::Procedural => fields
                .get("skill")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or(Some(title).filter(|t| !t.is_empty()))
                .map(str::to_string)
                .unwrap_or_else(|| content::truncate_chars(&text, 40)),
        };

        let mut content: Map<String, Value> = fields.clone();
        if fields.contains_key("content") {
            content.insert(
                "content".to_string(),
                Value::String(content::truncate_chars(&text, self.config.content_char_limit)),
            );
        }

        let connections = fields
            .get("connections")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let now = Utc::now();
        Ok((
            MemoryNode {
                id,
                content: Value::Object(content),
                memory_type,
                importance,
                created_at: now,
                last_accessed: now,
                access_count: 1,
                tags,
                connections,
                embedding: None,
                state: MemoryState::Active,
            },
            key,
        ))
    }
}

#[async_trait]
impl Arm for MemoryArm {
    fn name(&self) -> &str {
        MEMORY_ARM
    }

    async fn handle(&self, msg: Message, ctx: &CallContext) -> Result<Message, EngineError> {
        let request: MemoryRequest = serde_json::from_value(msg.payload.clone())?;

        let payload = match request {
            MemoryRequest::Store { data, context } => {
                let receipt = self.store(&data, &context, ctx).await?;
                json!({
                    "success": true,
                    "memory_id": receipt.memory_id,
                    "type": receipt.memory_type,
                    "tags": receipt.tags,
                    "access_count": receipt.access_count,
                    "created": receipt.inserted,
                })
            }
            MemoryRequest::Retrieve { query, .. } => {
                let memories = self.retrieve(&query, ctx).await?;
                json!({
                    "success": true,
                    "query": query,
                    "count": memories.len(),
                    "memories": memories,
                })
            }
            MemoryRequest::Search { query, limit } => {
                let limit = limit.unwrap_or(self.config.retrieve_limit);
                let results = ctx.run(self.store.search(&query, limit)).await??;
                json!({
                    "success": true,
                    "query": query,
                    "count": results.len(),
                    "results": results,
                })
            }
            MemoryRequest::Archive { memory_id } => {
                let archived = self.archive(&memory_id).await?;
                let mut out = json!({ "success": archived, "memory_id": memory_id });
                if !archived {
                    out["error"] = json!("memory not found");
                }
                out
            }
            MemoryRequest::Stats => {
                let mut out = self.stats().await?;
                out["success"] = json!(true);
                out
            }
        };

        Ok(Message::respond(&msg, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    async fn arm(temp_dir: &TempDir) -> (Database, MemoryArm) {
        let db = Database::new(&temp_dir.path().join("memory.db")).await.unwrap();
        let arm = MemoryArm::new(
            db.memory_store(),
            MemoryConfig::default(),
            MessageBus::new(),
            CancellationToken::new(),
        );
        (db, arm)
    }

    #[tokio::test]
    async fn test_store_semantic_memory() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, arm) = arm(&temp_dir).await;

        let msg = Message::new(
            "memory_request",
            json!({"type": "store", "data": {
                "content": "Golden ratio creates harmonic relationships",
                "type": "semantic",
                "tags": ["golden_ratio"]
            }}),
        );
        let response = arm.handle(msg, &CallContext::new()).await.unwrap();

        assert!(response.success());
        assert_eq!(response.payload["type"], json!("semantic"));
        assert_eq!(response.payload["memory_id"].as_str().unwrap().len(), 64);
        let tags = response.payload["tags"].as_array().unwrap();
        assert!(tags.contains(&json!("golden_ratio")));
        assert!(tags.contains(&json!("geometry:spiral")));
    }

    #[tokio::test]
    async fn test_content_truncated_but_id_from_full_data() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("memory.db")).await.unwrap();
        let config = MemoryConfig {
            content_char_limit: 5,
            ..MemoryConfig::default()
        };
        let arm = MemoryArm::new(db.memory_store(), config, MessageBus::new(), CancellationToken::new());

        let data = json!({"content": "abcdefghij"});
        let receipt = arm.store(&data, &Value::Null, &CallContext::new()).await.unwrap();
        assert_eq!(receipt.memory_id, content_id(&data));

        let stored = arm.store_handle().get(&receipt.memory_id).await.unwrap().unwrap();
        assert_eq!(stored.content["content"], json!("abcde"));
    }

    #[tokio::test]
    async fn test_retrieve_prefers_cache_then_store() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, arm) = arm(&temp_dir).await;
        let ctx = CallContext::new();

        arm.store(&json!({"content": "walk by the river"}), &Value::Null, &ctx)
            .await
            .unwrap();
        let hits = arm.retrieve("river", &ctx).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, cache::EPISODIC_SCORE);

        // a fresh arm on the same database only has the durable copy
        let cold = MemoryArm::new(
            arm.store_handle().clone(),
            MemoryConfig::default(),
            MessageBus::new(),
            CancellationToken::new(),
        );
        let hits = cold.retrieve("river", &ctx).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, cache::STORED_SCORE);

        // store, first retrieve, second retrieve
        let stored = arm.store_handle().get(&hits[0].memory.id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 3);
    }

    #[tokio::test]
    async fn test_persistence_failure_after_cache_insert() {
        let temp_dir = TempDir::new().unwrap();
        let (db, arm) = arm(&temp_dir).await;
        db.pool().close().await;

        let ctx = CallContext::new();
        let err = arm
            .store(&json!({"content": "lost on disk"}), &Value::Null, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PersistenceFailure(_)));

        // the cache kept it
        assert!(matches!(arm.stats().await, Err(EngineError::Database(_))));
        let hits = arm.cache.recall("lost", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        // access bump failures do not fail retrieve
        let hits = arm.retrieve("lost", &ctx).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_archive_and_stats() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, arm) = arm(&temp_dir).await;
        let ctx = CallContext::new();

        let receipt = arm
            .store(&json!({"content": "make tea", "type": "procedural", "skill": "tea"}), &Value::Null, &ctx)
            .await
            .unwrap();
        assert!(arm.archive(&receipt.memory_id).await.unwrap());
        assert!(!arm.archive("unknown").await.unwrap());

        let stored = arm.store_handle().get(&receipt.memory_id).await.unwrap().unwrap();
        assert_eq!(stored.state, MemoryState::Archived);

        let stats = arm.stats().await.unwrap();
        assert_eq!(stats["procedural"], json!(1));
        assert_eq!(stats["stored"], json!(1));
    }

    #[tokio::test]
    async fn test_restore_does_not_revive_archived_memory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("memory.db");
        let db = Database::new(&path).await.unwrap();
        let arm = MemoryArm::new(db.memory_store(), MemoryConfig::default(), MessageBus::new(), CancellationToken::new());
        let ctx = CallContext::new();
        let data = json!({"content": "old address", "type": "semantic", "concept": "home"});

        let receipt = arm.store(&data, &Value::Null, &ctx).await.unwrap();
        assert!(arm.archive(&receipt.memory_id).await.unwrap());
        let again = arm.store(&data, &Value::Null, &ctx).await.unwrap();
        assert_eq!(again.memory_id, receipt.memory_id);

        let hits = arm.cache.recall("old address", 10).await.unwrap();
        assert_eq!(hits[0].memory.state, MemoryState::Archived);
        drop(arm);
        db.close().await.unwrap();

        let db = Database::new(&path).await.unwrap();
        let stored = db.memory_store().get(&receipt.memory_id).await.unwrap().unwrap();
        assert_eq!(stored.state, MemoryState::Archived);
        assert_eq!(stored.access_count, 2);
    }

    #[tokio::test]
    async fn test_retrieve_reports_durable_access_count() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, arm) = arm(&temp_dir).await;
        let ctx = CallContext::new();
        let data = json!({"content": "lighthouse keeper"});

        // the durable row runs ahead of a cache that never saw the first store
        let id = content_id(&data);
        arm.store_handle()
            .upsert(arm.build_node(&data, &Value::Null).unwrap().0)
            .await
            .unwrap();
        arm.store(&data, &Value::Null, &ctx).await.unwrap();

        let hits = arm.retrieve("lighthouse", &ctx).await.unwrap();
        assert_eq!(hits[0].score, cache::EPISODIC_SCORE);
        let stored = arm.store_handle().get(&id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 3);
        assert_eq!(hits[0].memory.access_count, stored.access_count);

        let hits = arm.retrieve("lighthouse", &ctx).await.unwrap();
        assert_eq!(hits[0].memory.access_count, 4);
    }

    #[tokio::test]
    async fn test_cancelled_retrieve_records_no_access() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, arm) = arm(&temp_dir).await;

        let receipt = arm
            .store(&json!({"content": "quiet harbour"}), &Value::Null, &CallContext::new())
            .await
            .unwrap();

        let ctx = CallContext::new();
        ctx.cancel();
        let err = arm.retrieve("harbour", &ctx).await.unwrap_err();
        assert_eq!(err, EngineError::Cancelled);

        let stored = arm.store_handle().get(&receipt.memory_id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_memory_type_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, arm) = arm(&temp_dir).await;

        let err = arm
            .store(&json!({"content": "x", "type": "dreamlike"}), &Value::Null, &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
    }
}
