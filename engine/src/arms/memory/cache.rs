//! In-memory caches of the memory arm
//!
//! [`MemoryCache`] is plain data. [`CacheHandle`] runs one cache inside a task
//! and talks to it over a mailbox, so concurrent dispatches never touch the
//! ring buffer or the maps directly.

use crate::db::{MemoryNode, MemoryState, MemoryType, UpsertOutcome};
use chrono::Utc;
use sdk::errors::EngineError;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MAILBOX_SIZE: usize = 64;

pub const EPISODIC_SCORE: f64 = 0.8;
pub const SEMANTIC_SCORE: f64 = 0.7;
pub const STORED_SCORE: f64 = 0.6;

/// A retrieved memory with its match score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMemory {
    pub memory: MemoryNode,
    pub score: f64,
    pub source: &'static str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub episodic: usize,
    pub semantic_concepts: usize,
    pub semantic_nodes: usize,
    pub procedural: usize,
}

/// Episodic ring buffer plus semantic and procedural maps
#[derive(Debug)]
pub struct MemoryCache {
    episodic: VecDeque<MemoryNode>,
    episodic_capacity: usize,
    semantic: HashMap<String, Vec<MemoryNode>>,
    procedural: HashMap<String, MemoryNode>,
}

impl MemoryCache {
    pub fn new(episodic_capacity: usize) -> Self {
        Self {
            episodic: VecDeque::with_capacity(episodic_capacity),
            episodic_capacity,
            semantic: HashMap::new(),
            procedural: HashMap::new(),
        }
    }

    /// Place `node` by type; `key` is the concept or skill
    ///
    /// A node already cached under the same id is replaced, keeping its
    /// `created_at` and counting the access.
    pub fn insert(&mut self, mut node: MemoryNode, key: &str) {
        match node.memory_type {
            MemoryType::Episodic => {
                if let Some(pos) = self.episodic.iter().position(|n| n.id == node.id) {
                    if let Some(old) = self.episodic.remove(pos) {
                        carry_over(&old, &mut node);
                    }
                }
                self.episodic.push_back(node);
                while self.episodic.len() > self.episodic_capacity {
                    self.episodic.pop_front();
                }
            }
            MemoryType::Semantic => {
                let bucket = self.semantic.entry(key.to_string()).or_default();
                match bucket.iter_mut().find(|n| n.id == node.id) {
                    Some(existing) => {
                        carry_over(existing, &mut node);
                        *existing = node;
                    }
                    None => bucket.push(node),
                }
            }
            MemoryType::Procedural => {
                if let Some(old) = self.procedural.get(key) {
                    if old.id == node.id {
                        carry_over(old, &mut node);
                    }
                }
                self.procedural.insert(key.to_string(), node);
            }
        }
    }

    /// Substring matches in the newest `window` episodic entries and in every
    /// semantic bucket; matched nodes have their access recorded
    pub fn recall(&mut self, query: &str, window: usize) -> Vec<ScoredMemory> {
        let needle = query.to_lowercase();
        let now = Utc::now();
        let mut hits = Vec::new();

        let skip = self.episodic.len().saturating_sub(window);
        for node in self.episodic.iter_mut().skip(skip).rev() {
            if node.state != MemoryState::Forgotten && matches(node, &needle) {
                node.access_count += 1;
                node.last_accessed = now;
                hits.push(ScoredMemory {
                    memory: node.clone(),
                    score: EPISODIC_SCORE,
                    source: "episodic",
                });
            }
        }

        for (concept, bucket) in self.semantic.iter_mut() {
            let concept_hit = concept.to_lowercase().contains(&needle);
            for node in bucket.iter_mut() {
                if node.state != MemoryState::Forgotten && (concept_hit || matches(node, &needle)) {
                    node.access_count += 1;
                    node.last_accessed = now;
                    hits.push(ScoredMemory {
                        memory: node.clone(),
                        score: SEMANTIC_SCORE,
                        source: "semantic",
                    });
                }
            }
        }

        hits
    }

    /// Update the state of every cached copy of `id`
    pub fn set_state(&mut self, id: &str, state: MemoryState) -> bool {
        let mut found = false;
        let nodes = self
            .episodic
            .iter_mut()
            .chain(self.semantic.values_mut().flatten())
            .chain(self.procedural.values_mut());
        for node in nodes.filter(|n| n.id == id) {
            node.state = state;
            found = true;
        }
        found
    }

    /// Align every cached copy of a persisted node with its durable row
    pub fn reconcile(&mut self, outcome: &UpsertOutcome) {
        let nodes = self
            .episodic
            .iter_mut()
            .chain(self.semantic.values_mut().flatten())
            .chain(self.procedural.values_mut());
        for node in nodes.filter(|n| n.id == outcome.id) {
            node.access_count = outcome.access_count;
            node.created_at = outcome.created_at;
            node.state = outcome.state;
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            episodic: self.episodic.len(),
            semantic_concepts: self.semantic.len(),
            semantic_nodes: self.semantic.values().map(Vec::len).sum(),
            procedural: self.procedural.len(),
        }
    }
}

fn carry_over(old: &MemoryNode, new: &mut MemoryNode) {
    new.created_at = old.created_at;
    new.access_count = old.access_count + 1;
    if old.state.is_terminal() {
        new.state = old.state;
    }
}

fn matches(node: &MemoryNode, needle: &str) -> bool {
    node.searchable_text().to_lowercase().contains(needle)
        || node.tags.iter().any(|t| t.to_lowercase().contains(needle))
}

enum CacheCommand {
    Insert {
        node: Box<MemoryNode>,
        key: String,
        reply: oneshot::Sender<()>,
    },
    Recall {
        query: String,
        window: usize,
        reply: oneshot::Sender<Vec<ScoredMemory>>,
    },
    SetState {
        id: String,
        state: MemoryState,
        reply: oneshot::Sender<bool>,
    },
    Reconcile {
        outcome: UpsertOutcome,
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
}

/// Mailbox of a cache running in its own task
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<CacheCommand>,
}

impl CacheHandle {
    /// Spawn the actor; it stops when `shutdown` fires or every handle is dropped
    pub fn spawn(cache: MemoryCache, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        tokio::spawn(run_actor(cache, rx, shutdown));
        Self { tx }
    }

    pub async fn insert(&self, node: MemoryNode, key: String) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(CacheCommand::Insert {
            node: Box::new(node),
            key,
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn recall(&self, query: &str, window: usize) -> Result<Vec<ScoredMemory>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(CacheCommand::Recall {
            query: query.to_string(),
            window,
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn set_state(&self, id: &str, state: MemoryState) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(CacheCommand::SetState {
            id: id.to_string(),
            state,
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn reconcile(&self, outcome: UpsertOutcome) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(CacheCommand::Reconcile { outcome, reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn stats(&self) -> Result<CacheStats, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(CacheCommand::Stats { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    async fn send(&self, cmd: CacheCommand) -> Result<(), EngineError> {
        self.tx.send(cmd).await.map_err(|_| stopped())
    }
}

async fn run_actor(
    mut cache: MemoryCache,
    mut rx: mpsc::Receiver<CacheCommand>,
    shutdown: CancellationToken,
) {
    loop {
        let cmd = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };

        match cmd {
            CacheCommand::Insert { node, key, reply } => {
                cache.insert(*node, &key);
                let _ = reply.send(());
            }
            CacheCommand::Recall {
                query,
                window,
                reply,
            } => {
                let _ = reply.send(cache.recall(&query, window));
            }
            CacheCommand::SetState { id, state, reply } => {
                let _ = reply.send(cache.set_state(&id, state));
            }
            CacheCommand::Reconcile { outcome, reply } => {
                cache.reconcile(&outcome);
                let _ = reply.send(());
            }
            CacheCommand::Stats { reply } => {
                let _ = reply.send(cache.stats());
            }
        }
    }

    debug!("Memory cache actor stopped");
}

fn stopped() -> EngineError {
    EngineError::handler("memory_arm", "memory cache is not running")
}
