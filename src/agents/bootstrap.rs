//! Idempotent agent bootstrap
//!
//! Turns the configured agents into definitions (rendered instructions plus
//! tool bindings) and ensures each one on the hosting service, delegates
//! before the agents that call them.

use std::sync::Arc;
use tracing::info;

use super::domain::{Agent, AgentDefinition, ToolBinding};
use super::error::{AgentError, AgentResult};
use super::prompts::PromptCatalog;
use super::registry::AgentRegistry;
use super::tools::{ApiSpec, ToolSet};
use crate::config::validator::delegation_order;
use crate::config::{AgentConfig, Settings, DOCUMENT_SEARCH_TOOL, WEB_SEARCH_TOOL};

pub struct Bootstrapper<'a> {
    settings: &'a Settings,
    prompts: &'a PromptCatalog,
    registry: Arc<AgentRegistry>,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(settings: &'a Settings, prompts: &'a PromptCatalog, registry: Arc<AgentRegistry>) -> Self {
        Self {
            settings,
            prompts,
            registry,
        }
    }

    /// Ensure every configured agent; returns them in creation order
    pub async fn run(&self) -> AgentResult<Vec<Agent>> {
        let order = delegation_order(&self.settings.agents).map_err(AgentError::Configuration)?;

        let mut agents = Vec::with_capacity(order.len());
        for config in order {
            let definition = self.definition(config).await?;
            agents.push(self.registry.ensure_agent(definition).await?);
        }

        info!(agents = agents.len(), host = self.registry.host().name(), "Bootstrap complete");
        Ok(agents)
    }

    /// Build the wanted definition of one agent
    pub async fn definition(&self, config: &AgentConfig) -> AgentResult<AgentDefinition> {
        let instructions = self.prompts.render_instructions(config)?;
        let mut tools = ToolSet::new(&config.name);

        for delegate in &config.delegates_to {
            let target = self
                .settings
                .agent(&delegate.agent)
                .ok_or_else(|| AgentError::NotFound(format!("agent '{}'", delegate.agent)))?;
            let description = delegate
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .or_else(|| Some(target.description.clone()).filter(|d| !d.is_empty()))
                .unwrap_or_else(|| format!("Ask {} and return its answer", target.name));
            tools.add(ToolBinding::sub_agent(delegate.tool_name(), description, &target.name))?;
        }

        for api in &config.api_tools {
            let spec = ApiSpec::load(&api.spec).await?;
            let description = format!("{}\nOperations:\n{}", api.description, spec.summary());
            tools.add(ToolBinding::external_api(&api.name, description, &api.spec, api.auth.clone()))?;
        }

        if let Some(connection) = &config.web_search {
            tools.add(ToolBinding::web_search(WEB_SEARCH_TOOL, connection))?;
        }

        if config.document_search {
            tools.add(ToolBinding::document_search(DOCUMENT_SEARCH_TOOL, None))?;
        }

        Ok(AgentDefinition::new(&config.name, config.role, instructions).with_tools(tools.into_bindings()))
    }
}
