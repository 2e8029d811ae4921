//! Agent domain types

use serde::{Deserialize, Serialize};

use super::{AgentId, IndexId, ToolBinding};

/// Where an agent sits in the delegation tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Receives user messages directly
    Primary,
    /// Only reachable through a sub-agent tool call
    #[default]
    Sub,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Primary => write!(f, "primary"),
            AgentRole::Sub => write!(f, "sub"),
        }
    }
}

/// Everything needed to create or update an agent record, minus its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Stable agent name, unique across the hosting service
    pub name: String,
    pub role: AgentRole,
    /// Rendered instruction text
    pub instructions: String,
    /// Ordered tool bindings
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
    /// Document index bound to this agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_index: Option<IndexId>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, role: AgentRole, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            instructions: instructions.into(),
            tools: Vec::new(),
            attached_index: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolBinding>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_index(mut self, index: IndexId) -> Self {
        self.attached_index = Some(index);
        self
    }
}

/// An agent as known to the hosting service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_index: Option<IndexId>,
}

impl Agent {
    pub fn from_definition(id: AgentId, definition: AgentDefinition) -> Self {
        Self {
            id,
            name: definition.name,
            role: definition.role,
            instructions: definition.instructions,
            tools: definition.tools,
            attached_index: definition.attached_index,
        }
    }

    pub fn definition(&self) -> AgentDefinition {
        AgentDefinition {
            name: self.name.clone(),
            role: self.role,
            instructions: self.instructions.clone(),
            tools: self.tools.clone(),
            attached_index: self.attached_index.clone(),
        }
    }

    /// Look up a tool binding by name
    pub fn tool(&self, name: &str) -> Option<&ToolBinding> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Whether the wanted definition differs from this record.
    ///
    /// A wanted definition without an index leaves the bound index alone.
    pub fn drifts_from(&self, wanted: &AgentDefinition) -> bool {
        self.role != wanted.role
            || self.instructions != wanted.instructions
            || self.tools != wanted.tools
            || (wanted.attached_index.is_some() && self.attached_index != wanted.attached_index)
    }
}

/// Agent information for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_index: Option<IndexId>,
}

impl From<&Agent> for AgentInfo {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            name: agent.name.clone(),
            role: agent.role,
            tools: agent.tools.iter().map(|t| t.name().to_string()).collect(),
            attached_index: agent.attached_index.clone(),
        }
    }
}
