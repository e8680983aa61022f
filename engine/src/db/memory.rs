//! Memory node persistence
//!
//! [`MemoryStore`] is the durable side of the memory arm. Reads go straight to
//! the pool; every write is queued to one writer task, which is the only code
//! that mutates `memory_nodes`. Upserts to the same id are therefore applied in
//! submission order, and the read-modify-write of `access_count` and
//! `created_at` never interleaves.

use chrono::{DateTime, TimeZone, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Bound on queued writes before submitters wait
const WRITE_QUEUE_SIZE: usize = 256;

/// Memory category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Episodic,
    Semantic,
    Procedural,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
        }
    }
}

impl FromStr for MemoryType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            "procedural" => Ok(MemoryType::Procedural),
            other => Err(EngineError::InvalidPayload(format!(
                "unknown memory type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryState {
    #[default]
    Active,
    Dormant,
    Archived,
    Forgotten,
}

impl MemoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryState::Active => "active",
            MemoryState::Dormant => "dormant",
            MemoryState::Archived => "archived",
            MemoryState::Forgotten => "forgotten",
        }
    }

    /// Archived and forgotten nodes never return to an active state
    pub fn is_terminal(&self) -> bool {
        matches!(self, MemoryState::Archived | MemoryState::Forgotten)
    }

    fn parse(s: &str) -> Self {
        match s {
            "dormant" => MemoryState::Dormant,
            "archived" => MemoryState::Archived,
            "forgotten" => MemoryState::Forgotten,
            _ => MemoryState::Active,
        }
    }
}

/// A stored memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    /// Content hash of the canonicalised payload
    pub id: String,
    pub content: Value,
    pub memory_type: MemoryType,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    pub tags: BTreeSet<String>,
    pub connections: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub state: MemoryState,
}

impl MemoryNode {
    /// Text the substring matchers look at
    pub fn searchable_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.content.to_string()),
            other => other.to_string(),
        }
    }
}

/// Result of an upsert as seen by the database
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub id: String,
    /// True when the row did not exist before
    pub inserted: bool,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    /// Lifecycle state after the write; a terminal state survives re-storing
    pub state: MemoryState,
}

enum WriteOp {
    Upsert {
        node: Box<MemoryNode>,
        reply: oneshot::Sender<Result<UpsertOutcome, EngineError>>,
    },
    Touch {
        ids: Vec<String>,
        at: DateTime<Utc>,
        reply: oneshot::Sender<Result<HashMap<String, i64>, EngineError>>,
    },
    SetState {
        id: String,
        state: MemoryState,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
}

/// Durable memory table with a single-writer queue
#[derive(Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
    writer: mpsc::Sender<WriteOp>,
}

impl MemoryStore {
    /// Create the store and spawn its writer task
    pub fn new(pool: SqlitePool) -> Self {
        let (writer, rx) = mpsc::channel(WRITE_QUEUE_SIZE);
        tokio::spawn(writer_loop(pool.clone(), rx));
        Self { pool, writer }
    }

    /// Insert the node, or on id conflict keep `created_at`, bump
    /// `access_count` and overwrite every other column
    ///
    /// An archived or forgotten row keeps its state.
    pub async fn upsert(&self, node: MemoryNode) -> Result<UpsertOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.submit(WriteOp::Upsert {
            node: Box::new(node),
            reply,
        })
        .await?;
        rx.await.map_err(|_| writer_gone())?
    }

    /// Record one access for each id
    ///
    /// Returns the durable `access_count` of every id that matched a row.
    pub async fn touch(&self, ids: Vec<String>) -> Result<HashMap<String, i64>, EngineError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let (reply, rx) = oneshot::channel();
        self.submit(WriteOp::Touch {
            ids,
            at: Utc::now(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| writer_gone())?
    }

    /// Move a node to `state`; false when the id is unknown
    pub async fn set_state(&self, id: &str, state: MemoryState) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.submit(WriteOp::SetState {
            id: id.to_string(),
            state,
            reply,
        })
        .await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryNode>, EngineError> {
        let row = sqlx::query(
            "SELECT id, content, memory_type, importance, created_at, last_accessed, access_count, \
             tags, connections, embedding, state FROM memory_nodes WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|r| node_from_row(&r)).transpose()
    }

    /// Case-insensitive substring search over content and tags
    ///
    /// Forgotten nodes are skipped. Results are ordered by importance, then
    /// by most recent access.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryNode>, EngineError> {
        let pattern = format!("%{}%", escape_like(query));
        let rows = sqlx::query(
            r#"
            SELECT id, content, memory_type, importance, created_at, last_accessed, access_count,
                   tags, connections, embedding, state
            FROM memory_nodes
            WHERE (content LIKE ? ESCAPE '\' OR tags LIKE ? ESCAPE '\')
              AND state != 'forgotten'
            ORDER BY importance DESC, last_accessed DESC
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(node_from_row).collect()
    }

    pub async fn count(&self) -> Result<i64, EngineError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM memory_nodes")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn submit(&self, op: WriteOp) -> Result<(), EngineError> {
        self.writer.send(op).await.map_err(|_| writer_gone())
    }
}

async fn writer_loop(pool: SqlitePool, mut rx: mpsc::Receiver<WriteOp>) {
    debug!("Memory store writer started");

    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Upsert { node, reply } => {
                let result = write_upsert(&pool, &node).await;
                if let Err(e) = &result {
                    error!("Failed to persist memory {}: {}", node.id, e);
                }
                let _ = reply.send(result);
            }
            WriteOp::Touch { ids, at, reply } => {
                let _ = reply.send(write_touch(&pool, &ids, at).await);
            }
            WriteOp::SetState { id, state, reply } => {
                let _ = reply.send(write_state(&pool, &id, state).await);
            }
        }
    }

    debug!("Memory store writer stopped");
}

async fn write_upsert(pool: &SqlitePool, node: &MemoryNode) -> Result<UpsertOutcome, EngineError> {
    let content = serde_json::to_string(&node.content).map_err(persist_error)?;
    let tags = serde_json::to_string(&node.tags).map_err(persist_error)?;
    let connections = serde_json::to_string(&node.connections).map_err(persist_error)?;
    let embedding = node
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(persist_error)?;

    let row = sqlx::query(
        r#"
        INSERT INTO memory_nodes
            (id, content, memory_type, importance, created_at, last_accessed, access_count,
             tags, connections, embedding, state)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            content       = excluded.content,
            memory_type   = excluded.memory_type,
            importance    = excluded.importance,
            last_accessed = excluded.last_accessed,
            access_count  = memory_nodes.access_count + 1,
            tags          = excluded.tags,
            connections   = excluded.connections,
            embedding     = excluded.embedding,
            state         = CASE
                WHEN memory_nodes.state IN ('archived', 'forgotten') THEN memory_nodes.state
                ELSE excluded.state
            END
        RETURNING access_count, created_at, state
        "#,
    )
    .bind(&node.id)
    .bind(content)
    .bind(node.memory_type.as_str())
    .bind(node.importance.clamp(0.0, 1.0))
    .bind(node.created_at.timestamp_millis())
    .bind(node.last_accessed.timestamp_millis())
    .bind(tags)
    .bind(connections)
    .bind(embedding)
    .bind(node.state.as_str())
    .fetch_one(pool)
    .await
    .map_err(persist_error)?;

    let access_count: i64 = row.try_get("access_count").map_err(persist_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(persist_error)?;
    let state: String = row.try_get("state").map_err(persist_error)?;

    Ok(UpsertOutcome {
        id: node.id.clone(),
        inserted: access_count == 1,
        access_count,
        created_at: from_millis(created_at),
        state: MemoryState::parse(&state),
    })
}

async fn write_touch(
    pool: &SqlitePool,
    ids: &[String],
    at: DateTime<Utc>,
) -> Result<HashMap<String, i64>, EngineError> {
    let mut tx = pool.begin().await.map_err(db_error)?;
    let mut touched = HashMap::with_capacity(ids.len());

    for id in ids {
        let row = sqlx::query(
            r#"
            UPDATE memory_nodes SET access_count = access_count + 1, last_accessed = ?
            WHERE id = ?
            RETURNING access_count
            "#,
        )
        .bind(at.timestamp_millis())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        if let Some(row) = row {
            let count: i64 = row.try_get("access_count").map_err(db_error)?;
            touched.insert(id.clone(), count);
        }
    }

    tx.commit().await.map_err(db_error)?;
    Ok(touched)
}

async fn write_state(pool: &SqlitePool, id: &str, state: MemoryState) -> Result<bool, EngineError> {
    let result = sqlx::query("UPDATE memory_nodes SET state = ? WHERE id = ?")
        .bind(state.as_str())
        .bind(id)
        .execute(pool)
        .await
        .map_err(db_error)?;
    Ok(result.rows_affected() > 0)
}

fn node_from_row(row: &SqliteRow) -> Result<MemoryNode, EngineError> {
    let raw_content: String = row.try_get("content").map_err(db_error)?;
    let content = serde_json::from_str(&raw_content).unwrap_or(Value::String(raw_content));

    let raw_tags: String = row.try_get("tags").map_err(db_error)?;
    let tags = serde_json::from_str(&raw_tags).unwrap_or_else(|e| {
        warn!("Unreadable tags column, treating as empty: {}", e);
        BTreeSet::new()
    });

    let raw_connections: String = row.try_get("connections").map_err(db_error)?;
    let connections = serde_json::from_str(&raw_connections).unwrap_or_default();

    let raw_embedding: Option<String> = row.try_get("embedding").map_err(db_error)?;
    let embedding = raw_embedding.and_then(|e| serde_json::from_str(&e).ok());

    let memory_type: String = row.try_get("memory_type").map_err(db_error)?;
    let state: String = row.try_get("state").map_err(db_error)?;

    Ok(MemoryNode {
        id: row.try_get("id").map_err(db_error)?,
        content,
        memory_type: memory_type.parse()?,
        importance: row.try_get("importance").map_err(db_error)?,
        created_at: from_millis(row.try_get("created_at").map_err(db_error)?),
        last_accessed: from_millis(row.try_get("last_accessed").map_err(db_error)?),
        access_count: row.try_get("access_count").map_err(db_error)?,
        tags,
        connections,
        embedding,
        state: MemoryState::parse(&state),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn db_error(e: impl fmt::Display) -> EngineError {
    EngineError::Database(e.to_string())
}

fn persist_error(e: impl fmt::Display) -> EngineError {
    EngineError::PersistenceFailure(e.to_string())
}

fn writer_gone() -> EngineError {
    EngineError::PersistenceFailure("memory store writer has stopped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    fn node(id: &str, text: &str, memory_type: MemoryType) -> MemoryNode {
        let now = Utc::now();
        MemoryNode {
            id: id.to_string(),
            content: json!({ "content": text }),
            memory_type,
            importance: 0.5,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            tags: BTreeSet::from(["test".to_string()]),
            connections: vec![],
            embedding: None,
            state: MemoryState::Active,
        }
    }

    async fn open(temp_dir: &TempDir) -> (Database, MemoryStore) {
        let db = Database::new(&temp_dir.path().join("memory.db"))
            .await
            .unwrap();
        let store = db.memory_store();
        (db, store)
    }

    #[tokio::test]
    async fn test_upsert_insert_then_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store) = open(&temp_dir).await;

        let first = store
            .upsert(node("abc", "first", MemoryType::Semantic))
            .await
            .unwrap();
        assert!(first.inserted);
        assert_eq!(first.access_count, 1);

        let mut again = node("abc", "second", MemoryType::Semantic);
        again.created_at = first.created_at + chrono::Duration::hours(1);
        let second = store.upsert(again).await.unwrap();

        assert!(!second.inserted);
        assert_eq!(second.access_count, 2);
        assert_eq!(second.created_at, first.created_at);

        let stored = store.get("abc").await.unwrap().unwrap();
        assert_eq!(stored.searchable_text(), "second");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_touch_bumps_access_count() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store) = open(&temp_dir).await;

        store
            .upsert(node("n1", "alpha", MemoryType::Episodic))
            .await
            .unwrap();

        let touched = store
            .touch(vec!["n1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched["n1"], 2);

        let stored = store.get("n1").await.unwrap().unwrap();
        assert_eq!(stored.access_count, 2);
    }

    #[tokio::test]
    async fn test_search_escapes_wildcards() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store) = open(&temp_dir).await;

        store
            .upsert(node("n1", "100% certain", MemoryType::Semantic))
            .await
            .unwrap();
        store
            .upsert(node("n2", "1000 reasons", MemoryType::Semantic))
            .await
            .unwrap();

        let hits = store.search("0%", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n1");
    }

    #[tokio::test]
    async fn test_search_skips_forgotten() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store) = open(&temp_dir).await;

        store
            .upsert(node("n1", "spiral staircase", MemoryType::Episodic))
            .await
            .unwrap();
        assert!(store.set_state("n1", MemoryState::Forgotten).await.unwrap());
        assert!(!store.set_state("nope", MemoryState::Archived).await.unwrap());

        assert!(store.search("spiral", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_keeps_terminal_state() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store) = open(&temp_dir).await;

        store
            .upsert(node("n1", "old notes", MemoryType::Semantic))
            .await
            .unwrap();
        store
            .upsert(node("n2", "older notes", MemoryType::Semantic))
            .await
            .unwrap();
        assert!(store.set_state("n1", MemoryState::Archived).await.unwrap());
        assert!(store.set_state("n2", MemoryState::Forgotten).await.unwrap());

        let archived = store
            .upsert(node("n1", "old notes", MemoryType::Semantic))
            .await
            .unwrap();
        assert_eq!(archived.state, MemoryState::Archived);
        assert_eq!(archived.access_count, 2);

        let forgotten = store
            .upsert(node("n2", "older notes", MemoryType::Semantic))
            .await
            .unwrap();
        assert_eq!(forgotten.state, MemoryState::Forgotten);

        assert_eq!(store.get("n1").await.unwrap().unwrap().state, MemoryState::Archived);
        assert_eq!(store.get("n2").await.unwrap().unwrap().state, MemoryState::Forgotten);
        assert!(store.search("older", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_non_terminal_state() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store) = open(&temp_dir).await;

        store
            .upsert(node("n1", "resting", MemoryType::Episodic))
            .await
            .unwrap();
        assert!(store.set_state("n1", MemoryState::Dormant).await.unwrap());

        let outcome = store
            .upsert(node("n1", "resting", MemoryType::Episodic))
            .await
            .unwrap();
        assert_eq!(outcome.state, MemoryState::Active);
    }

    #[test]
    fn test_memory_type_parse() {
        assert_eq!("semantic".parse::<MemoryType>().unwrap(), MemoryType::Semantic);
        assert!("dreamlike".parse::<MemoryType>().is_err());
    }
}
