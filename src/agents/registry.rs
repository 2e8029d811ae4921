//! Agent registry
//!
//! A read-through cache over the agent records held by the hosting service.
//! The remote side is the source of truth: after a restart the cache fills
//! again on first lookup. Reads are cheap and concurrent; writes (ensure,
//! tool and index changes) are serialized through one gate.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::domain::{Agent, AgentDefinition, IndexId, ToolBinding};
use super::error::{AgentError, AgentResult};
use super::hosting::{with_retry, AgentHost, RetryPolicy};
use super::tools::ToolSet;

pub struct AgentRegistry {
    host: Arc<dyn AgentHost>,
    cache: RwLock<HashMap<String, Agent>>,
    writes: Mutex<()>,
    retry: RetryPolicy,
}

impl AgentRegistry {
    pub fn new(host: Arc<dyn AgentHost>, retry: RetryPolicy) -> Self {
        Self {
            host,
            cache: RwLock::new(HashMap::new()),
            writes: Mutex::new(()),
            retry,
        }
    }

    pub fn host(&self) -> Arc<dyn AgentHost> {
        self.host.clone()
    }

    /// Create the agent if absent, update it in place if it drifted, otherwise reuse it.
    ///
    /// A definition without an index keeps whatever index is already bound.
    /// Duplicate tool names are rejected before anything is sent remotely.
    pub async fn ensure_agent(&self, mut definition: AgentDefinition) -> AgentResult<Agent> {
        let mut tools = ToolSet::new(&definition.name);
        for binding in std::mem::take(&mut definition.tools) {
            tools.add(binding)?;
        }
        definition.tools = tools.into_bindings();

        let _gate = self.writes.lock().await;

        let existing = match self.cached(&definition.name).await {
            Some(agent) => Some(agent),
            None => self.lookup_remote(&definition.name).await?,
        };

        if let Some(agent) = &existing {
            if !agent.drifts_from(&definition) {
                debug!(agent = %agent.name, id = %agent.id, "Agent up to date");
                return Ok(agent.clone());
            }
            if definition.attached_index.is_none() {
                definition.attached_index = agent.attached_index.clone();
            }
        }

        let existing_id = existing.as_ref().map(|a| &a.id);
        let id = self.host.create_or_update_agent(existing_id, &definition).await?;
        match existing_id {
            Some(_) => info!(agent = %definition.name, id = %id, "Updated agent"),
            None => info!(agent = %definition.name, id = %id, role = %definition.role, "Created agent"),
        }

        let agent = Agent::from_definition(id, definition);
        self.cache.write().await.insert(agent.name.clone(), agent.clone());
        Ok(agent)
    }

    /// Look up an agent by name, falling back to the hosting service
    pub async fn get_agent(&self, name: &str) -> AgentResult<Agent> {
        if let Some(agent) = self.cached(name).await {
            return Ok(agent);
        }
        self.lookup_remote(name)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("agent '{}'", name)))
    }

    /// Rebuild the cache from the hosting service
    pub async fn refresh(&self) -> AgentResult<usize> {
        let agents = with_retry(&self.retry, "list_agents", || self.host.list_agents()).await?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for agent in agents {
            cache.insert(agent.name.clone(), agent);
        }
        Ok(cache.len())
    }

    /// Cached agents, sorted by name
    pub async fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.cache.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    /// Append a tool to an agent. A name clash leaves the tool list unchanged.
    pub async fn attach_tool(&self, agent_name: &str, binding: ToolBinding) -> AgentResult<Agent> {
        let _gate = self.writes.lock().await;

        let agent = self.get_agent(agent_name).await?;
        if agent.tool(binding.name()).is_some() {
            return Err(AgentError::DuplicateTool {
                agent: agent.name,
                tool: binding.name().to_string(),
            });
        }

        let mut wanted = agent.definition();
        wanted.tools.push(binding);
        self.write_definition(agent, wanted).await
    }

    /// Set or clear the agent's bound index
    pub async fn set_index(&self, agent_name: &str, index: Option<IndexId>) -> AgentResult<Agent> {
        let _gate = self.writes.lock().await;

        let agent = self.get_agent(agent_name).await?;
        let mut wanted = agent.definition();
        wanted.attached_index = index;
        self.write_definition(agent, wanted).await
    }

    async fn write_definition(&self, agent: Agent, wanted: AgentDefinition) -> AgentResult<Agent> {
        self.host.update_agent(&agent.id, &wanted).await?;
        let updated = Agent::from_definition(agent.id, wanted);
        self.cache.write().await.insert(updated.name.clone(), updated.clone());
        Ok(updated)
    }

    async fn cached(&self, name: &str) -> Option<Agent> {
        self.cache.read().await.get(name).cloned()
    }

    async fn lookup_remote(&self, name: &str) -> AgentResult<Option<Agent>> {
        let agents = with_retry(&self.retry, "list_agents", || self.host.list_agents()).await?;
        let found = agents.into_iter().find(|a| a.name == name);
        if let Some(agent) = &found {
            debug!(agent = %name, id = %agent.id, "Loaded agent from hosting service");
            self.cache.write().await.insert(agent.name.clone(), agent.clone());
        }
        Ok(found)
    }
}
