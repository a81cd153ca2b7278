//! Agent memory: saved turns plus recall over stored observations.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::agent::state::Turn;
use crate::error::{DatabaseError, ToolError};
use crate::tools::builtin::vector_search::{SearchHit, SearchIndex};

/// Memory collaborator used by the engine.
#[async_trait]
pub trait AgentMemory: Send + Sync {
    /// Saved turns for an agent, oldest first.
    async fn load(&self, agent_id: &str) -> Result<Vec<Turn>, DatabaseError>;

    /// Replace the saved turns for an agent.
    async fn save(&self, agent_id: &str, history: &[Turn]) -> Result<(), DatabaseError>;

    /// Drop saved turns and observations for an agent.
    async fn clear(&self, agent_id: &str) -> Result<(), DatabaseError>;

    /// Up to `k` stored snippets relevant to `query`.
    async fn retrieve(
        &self,
        agent_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<String>, DatabaseError>;

    /// Add an observation to long-term recall.
    async fn store_observation(&self, agent_id: &str, text: &str) -> Result<(), DatabaseError>;
}

const MAX_OBSERVATIONS_PER_AGENT: usize = 500;
const DEFAULT_MAX_AGENTS: usize = 1024;

#[derive(Default)]
struct AgentEntry {
    history: Vec<Turn>,
    observations: Vec<String>,
    last_write: u64,
}

#[derive(Default)]
struct Agents {
    entries: HashMap<String, AgentEntry>,
    clock: u64,
}

impl Agents {
    /// Entry for `agent_id`, created if needed and marked as just written.
    /// Creating an entry at capacity evicts the least recently written one.
    fn touch(&mut self, agent_id: &str, capacity: usize) -> &mut AgentEntry {
        self.clock += 1;
        if !self.entries.contains_key(agent_id) && self.entries.len() >= capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_write)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
                tracing::debug!(agent_id = %oldest, "Evicted agent memory");
            }
        }
        let entry = self.entries.entry(agent_id.to_string()).or_default();
        entry.last_write = self.clock;
        entry
    }
}

/// Process-local memory with term-overlap recall.
///
/// Holds at most `capacity` agents; the least recently written agent is
/// dropped to make room for a new one.
pub struct InMemoryAgentMemory {
    agents: RwLock<Agents>,
    capacity: usize,
}

impl Default for InMemoryAgentMemory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_AGENTS)
    }
}

impl InMemoryAgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            agents: RwLock::new(Agents::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of agents currently held.
    pub async fn len(&self) -> usize {
        self.agents.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Rank `docs` by shared terms with `query`, newest first on ties.
/// An empty query returns the most recent documents.
fn rank<'a>(docs: impl Iterator<Item = &'a String>, query: &str, k: usize) -> Vec<(usize, &'a String)> {
    let wanted = terms(query);
    let mut scored: Vec<(usize, usize, &String)> = docs
        .enumerate()
        .map(|(i, doc)| {
            let score = if wanted.is_empty() {
                1
            } else {
                terms(doc).intersection(&wanted).count()
            };
            (score, i, doc)
        })
        .filter(|(score, _, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    scored
        .into_iter()
        .take(k)
        .map(|(score, _, doc)| (score, doc))
        .collect()
}

#[async_trait]
impl AgentMemory for InMemoryAgentMemory {
    async fn load(&self, agent_id: &str) -> Result<Vec<Turn>, DatabaseError> {
        Ok(self
            .agents
            .read()
            .await
            .entries
            .get(agent_id)
            .map(|e| e.history.clone())
            .unwrap_or_default())
    }

    async fn save(&self, agent_id: &str, history: &[Turn]) -> Result<(), DatabaseError> {
        self.agents
            .write()
            .await
            .touch(agent_id, self.capacity)
            .history = history.to_vec();
        Ok(())
    }

    async fn clear(&self, agent_id: &str) -> Result<(), DatabaseError> {
        self.agents.write().await.entries.remove(agent_id);
        Ok(())
    }

    async fn retrieve(
        &self,
        agent_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<String>, DatabaseError> {
        let agents = self.agents.read().await;
        let Some(entry) = agents.entries.get(agent_id) else {
            return Ok(Vec::new());
        };
        Ok(rank(entry.observations.iter(), query, k)
            .into_iter()
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn store_observation(&self, agent_id: &str, text: &str) -> Result<(), DatabaseError> {
        let mut agents = self.agents.write().await;
        let observations = &mut agents.touch(agent_id, self.capacity).observations;
        observations.push(text.to_string());
        if observations.len() > MAX_OBSERVATIONS_PER_AGENT {
            let excess = observations.len() - MAX_OBSERVATIONS_PER_AGENT;
            observations.drain(..excess);
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for InMemoryAgentMemory {
    async fn search(
        &self,
        agent_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let agents = self.agents.read().await;
        let Some(entry) = agents.entries.get(agent_id) else {
            return Ok(Vec::new());
        };
        let query_terms = terms(query).len().max(1) as f32;
        Ok(rank(entry.observations.iter(), query, top_k)
            .into_iter()
            .map(|(score, doc)| SearchHit {
                text: doc.clone(),
                score: score as f32 / query_terms,
            })
            .collect())
    }
}
