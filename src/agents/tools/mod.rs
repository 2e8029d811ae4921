//! Tool registry
//!
//! Maps tool names to the closed set of capabilities an agent can invoke:
//! delegate to a sub-agent, call an OpenAPI-described API, search a document
//! index, or search the web.

pub mod openapi;
pub mod web_search;

pub use openapi::{ApiPort, ApiResponse, ApiSpec, HttpApiInvoker};
pub use web_search::{BingWebSearch, WebSearchPort};

use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use super::domain::{Agent, ApiAuthMode, IndexId, ToolBinding};
use super::error::{AgentError, AgentResult};
use super::registry::AgentRegistry;

/// Tool names must match `[A-Za-z0-9_-]{1,64}`
pub fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Ordered, duplicate-free tool list under construction
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    agent: String,
    names: HashSet<String>,
    bindings: Vec<ToolBinding>,
}

impl ToolSet {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, binding: ToolBinding) -> AgentResult<&mut Self> {
        let name = binding.name();
        if !is_valid_tool_name(name) {
            return Err(AgentError::Validation(format!(
                "tool name '{}' on agent '{}' must match [A-Za-z0-9_-]{{1,64}}",
                name, self.agent
            )));
        }
        if !self.names.insert(name.to_string()) {
            return Err(AgentError::DuplicateTool {
                agent: self.agent.clone(),
                tool: name.to_string(),
            });
        }
        self.bindings.push(binding);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn into_bindings(self) -> Vec<ToolBinding> {
        self.bindings
    }
}

/// Registers tools on agents and resolves tool names at call time
pub struct ToolRegistry {
    agents: Arc<AgentRegistry>,
}

impl ToolRegistry {
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self { agents }
    }

    /// Expose `child` as a callable tool on `parent`
    pub async fn register_sub_agent_tool(
        &self,
        parent: &str,
        child: &str,
        tool_name: &str,
        description: &str,
    ) -> AgentResult<ToolBinding> {
        self.agents.get_agent(child).await?;
        let description = if description.is_empty() {
            format!("Ask {} and return its answer", child)
        } else {
            description.to_string()
        };
        self.register(parent, ToolBinding::sub_agent(tool_name, description, child))
            .await
    }

    pub async fn register_api_tool(
        &self,
        parent: &str,
        tool_name: &str,
        description: &str,
        spec_ref: &str,
        auth: ApiAuthMode,
    ) -> AgentResult<ToolBinding> {
        self.register(parent, ToolBinding::external_api(tool_name, description, spec_ref, auth))
            .await
    }

    /// Search over `index`, or over whatever index the agent has bound when None
    pub async fn register_document_search_tool(
        &self,
        parent: &str,
        tool_name: &str,
        index: Option<IndexId>,
    ) -> AgentResult<ToolBinding> {
        self.register(parent, ToolBinding::document_search(tool_name, index))
            .await
    }

    pub async fn register_web_search_tool(
        &self,
        parent: &str,
        tool_name: &str,
        connection: &str,
    ) -> AgentResult<ToolBinding> {
        self.register(parent, ToolBinding::web_search(tool_name, connection))
            .await
    }

    /// Resolve a tool name on the calling agent
    pub async fn resolve(&self, agent_name: &str, tool_name: &str) -> AgentResult<ToolBinding> {
        let agent = self.agents.get_agent(agent_name).await?;
        Self::resolve_on(&agent, tool_name)
    }

    /// Resolve against an already loaded agent record
    pub fn resolve_on(agent: &Agent, tool_name: &str) -> AgentResult<ToolBinding> {
        agent.tool(tool_name).cloned().ok_or_else(|| AgentError::UnknownTool {
            agent: agent.name.clone(),
            tool: tool_name.to_string(),
        })
    }

    async fn register(&self, parent: &str, binding: ToolBinding) -> AgentResult<ToolBinding> {
        if !is_valid_tool_name(binding.name()) {
            return Err(AgentError::Validation(format!(
                "tool name '{}' must match [A-Za-z0-9_-]{{1,64}}",
                binding.name()
            )));
        }
        self.agents.attach_tool(parent, binding.clone()).await?;
        info!(agent = %parent, tool = %binding.name(), kind = binding.kind(), "Registered tool");
        Ok(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_rules() {
        assert!(is_valid_tool_name("zoning_advisor"));
        assert!(is_valid_tool_name("rentcast-api2"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name("has space"));
        assert!(!is_valid_tool_name(&"x".repeat(65)));
    }

    #[test]
    fn test_tool_set_rejects_duplicates() {
        let mut set = ToolSet::new("InvestmentAdvisorAgent");
        set.add(ToolBinding::sub_agent("zoning_advisor", "Zoning", "ZoningAdvisorAgent"))
            .unwrap();
        let err = set
            .add(ToolBinding::web_search("zoning_advisor", "bing"))
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool { .. }));
        assert_eq!(set.len(), 1);
    }
}
