use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::agents::domain::{AgentRole, ApiAuthMode};
use crate::agents::tools::is_valid_tool_name;
use crate::config::{AgentConfig, HostingBackend, Settings};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Cross-reference error: {0}")]
    CrossReference(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        Self::validate_server(settings, &mut errors);
        Self::validate_hosting(settings, &mut errors);
        Self::validate_router(settings, &mut errors);
        Self::validate_agents(&settings.agents, &mut errors);
        Self::validate_cross_references(settings, &mut errors);
        Self::validate_delegation_cycles(&settings.agents, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(settings: &Settings, errors: &mut Vec<ValidationError>) {
        if settings.server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if settings.server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }
    }

    fn validate_hosting(settings: &Settings, errors: &mut Vec<ValidationError>) {
        if settings.hosting.backend != HostingBackend::Foundry {
            return;
        }
        if settings.hosting.endpoint.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::MissingField("hosting.endpoint".to_string()));
        }
        if settings.hosting.deployment.is_empty() {
            errors.push(ValidationError::MissingField("hosting.deployment".to_string()));
        }
    }

    fn validate_router(settings: &Settings, errors: &mut Vec<ValidationError>) {
        match settings.router.max_tool_rounds {
            None => errors.push(ValidationError::MissingField("router.max_tool_rounds".to_string())),
            Some(0) => errors.push(ValidationError::InvalidValue {
                field: "router.max_tool_rounds".to_string(),
                reason: "Must be greater than 0".to_string(),
            }),
            Some(_) => {}
        }

        if settings.router.stream_buffer == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "router.stream_buffer".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
    }

    fn validate_agents(agents: &[AgentConfig], errors: &mut Vec<ValidationError>) {
        let mut seen_names = HashMap::new();

        for (idx, agent) in agents.iter().enumerate() {
            if let Some(prev_idx) = seen_names.insert(&agent.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Agent name '{}' appears at indices {} and {}",
                    agent.name, prev_idx, idx
                )));
            }

            if agent.name.is_empty() {
                errors.push(ValidationError::MissingField(format!("agents[{}].name", idx)));
            }

            if agent.template.is_none() && agent.instructions.is_none() {
                errors.push(ValidationError::InvalidValue {
                    field: format!("agents[{}]", idx),
                    reason: "Either 'template' or 'instructions' must be provided".to_string(),
                });
            }

            let mut seen_tools = HashSet::new();
            for tool in agent.tool_names() {
                if !is_valid_tool_name(&tool) {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("agents[{}].tools", idx),
                        reason: format!("'{}' must match [A-Za-z0-9_-]{{1,64}}", tool),
                    });
                }
                if !seen_tools.insert(tool.clone()) {
                    errors.push(ValidationError::Duplicate(format!(
                        "Agent '{}' declares tool '{}' more than once",
                        agent.name, tool
                    )));
                }
            }
        }

        let primaries = agents.iter().filter(|a| a.role == AgentRole::Primary).count();
        if !agents.is_empty() && primaries != 1 {
            errors.push(ValidationError::InvalidValue {
                field: "agents".to_string(),
                reason: format!("Exactly one primary agent is required, found {}", primaries),
            });
        }
    }

    fn validate_cross_references(settings: &Settings, errors: &mut Vec<ValidationError>) {
        let agent_names: HashSet<&str> = settings.agents.iter().map(|a| a.name.as_str()).collect();
        let connection_names: HashSet<&str> = settings.connections.iter().map(|c| c.name.as_str()).collect();

        for agent in &settings.agents {
            for delegate in &agent.delegates_to {
                if !agent_names.contains(delegate.agent.as_str()) {
                    errors.push(ValidationError::CrossReference(format!(
                        "Agent '{}' delegates to unknown agent '{}'",
                        agent.name, delegate.agent
                    )));
                }
            }

            if let Some(connection) = &agent.web_search {
                if !connection_names.contains(connection.as_str()) {
                    errors.push(ValidationError::CrossReference(format!(
                        "Agent '{}' uses unknown web search connection '{}'",
                        agent.name, connection
                    )));
                }
            }

            for tool in &agent.api_tools {
                if let ApiAuthMode::Connection { connection } = &tool.auth {
                    if !connection_names.contains(connection.as_str()) {
                        errors.push(ValidationError::CrossReference(format!(
                            "API tool '{}' uses unknown connection '{}'",
                            tool.name, connection
                        )));
                    }
                }
            }
        }

        if let Some(target) = &settings.documents.target_agent {
            match settings.agent(target) {
                None => errors.push(ValidationError::CrossReference(format!(
                    "documents.target_agent '{}' is not a configured agent",
                    target
                ))),
                Some(agent) if !agent.document_search => errors.push(ValidationError::InvalidValue {
                    field: "documents.target_agent".to_string(),
                    reason: format!("Agent '{}' must set document_search = true", target),
                }),
                Some(_) => {}
            }
        }
    }

    /// Delegation must form a DAG so bootstrap can create children first
    fn validate_delegation_cycles(agents: &[AgentConfig], errors: &mut Vec<ValidationError>) {
        if let Err(cycle) = delegation_order(agents) {
            errors.push(ValidationError::InvalidValue {
                field: "agents.delegates_to".to_string(),
                reason: format!("Delegation cycle through '{}'", cycle),
            });
        }
    }
}

/// Agents ordered so every delegate precedes the agents delegating to it.
///
/// Fails with the name of an agent on a cycle. Unknown delegates are ignored.
pub fn delegation_order(agents: &[AgentConfig]) -> Result<Vec<&AgentConfig>, String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        agent: &'a AgentConfig,
        by_name: &HashMap<&str, &'a AgentConfig>,
        marks: &mut HashMap<&'a str, Mark>,
        order: &mut Vec<&'a AgentConfig>,
    ) -> Result<(), String> {
        match marks.get(agent.name.as_str()) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(agent.name.clone()),
            None => {}
        }
        marks.insert(agent.name.as_str(), Mark::Visiting);
        for delegate in &agent.delegates_to {
            if let Some(&child) = by_name.get(delegate.agent.as_str()) {
                visit(child, by_name, marks, order)?;
            }
        }
        marks.insert(agent.name.as_str(), Mark::Done);
        order.push(agent);
        Ok(())
    }

    let by_name: HashMap<&str, &AgentConfig> = agents.iter().map(|a| (a.name.as_str(), a)).collect();
    let mut marks = HashMap::new();
    let mut order = Vec::with_capacity(agents.len());
    for agent in agents {
        visit(agent, &by_name, &mut marks, &mut order)?;
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DelegateConfig, DocumentSettings, ServerSettings};

    fn agent(name: &str, role: AgentRole, delegates: &[&str]) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            role,
            description: String::new(),
            template: None,
            instructions: Some(format!("You are {}", name)),
            context: serde_json::Value::Null,
            delegates_to: delegates
                .iter()
                .map(|d| DelegateConfig {
                    agent: d.to_string(),
                    tool: None,
                    description: None,
                })
                .collect(),
            api_tools: vec![],
            web_search: None,
            document_search: false,
            memory: Default::default(),
        }
    }

    fn settings(agents: Vec<AgentConfig>) -> Settings {
        Settings {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            hosting: crate::config::HostingSettings {
                backend: HostingBackend::InMemory,
                ..Default::default()
            },
            router: crate::config::RouterSettings {
                max_tool_rounds: Some(4),
                stream_buffer: 64,
            },
            prompts: Default::default(),
            documents: DocumentSettings::default(),
            agents,
            connections: vec![],
        }
    }

    #[test]
    fn test_valid_config() {
        let settings = settings(vec![
            agent("Advisor", AgentRole::Primary, &["Zoning"]),
            agent("Zoning", AgentRole::Sub, &[]),
        ]);
        assert!(ConfigValidator::validate(&settings).is_ok());
    }

    #[test]
    fn test_missing_round_limit() {
        let mut settings = settings(vec![]);
        settings.router.max_tool_rounds = None;
        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ValidationError::MissingField(f) if f == "router.max_tool_rounds"));
    }

    #[test]
    fn test_zero_round_limit() {
        let mut settings = settings(vec![]);
        settings.router.max_tool_rounds = Some(0);
        assert!(ConfigValidator::validate(&settings).is_err());
    }

    #[test]
    fn test_foundry_requires_endpoint() {
        let mut settings = settings(vec![]);
        settings.hosting.backend = HostingBackend::Foundry;
        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::MissingField(f) if f == "hosting.endpoint")));
    }

    #[test]
    fn test_duplicate_agent_names() {
        let settings = settings(vec![
            agent("Advisor", AgentRole::Primary, &[]),
            agent("Advisor", AgentRole::Sub, &[]),
        ]);
        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Duplicate(_))));
    }

    #[test]
    fn test_requires_single_primary() {
        let settings = settings(vec![
            agent("A", AgentRole::Primary, &[]),
            agent("B", AgentRole::Primary, &[]),
        ]);
        assert!(ConfigValidator::validate(&settings).is_err());
    }

    #[test]
    fn test_unknown_delegate() {
        let settings = settings(vec![agent("Advisor", AgentRole::Primary, &["Ghost"])]);
        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::CrossReference(_))));
    }

    #[test]
    fn test_delegation_cycle() {
        let settings = settings(vec![
            agent("A", AgentRole::Primary, &["B"]),
            agent("B", AgentRole::Sub, &["C"]),
            agent("C", AgentRole::Sub, &["B"]),
        ]);
        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("Delegation cycle")));
    }

    #[test]
    fn test_delegation_order_children_first() {
        let agents = vec![
            agent("Advisor", AgentRole::Primary, &["Valuation", "Zoning"]),
            agent("Valuation", AgentRole::Sub, &[]),
            agent("Zoning", AgentRole::Sub, &[]),
        ];
        let order: Vec<&str> = delegation_order(&agents)
            .unwrap()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(order, vec!["Valuation", "Zoning", "Advisor"]);
    }

    #[test]
    fn test_document_target_must_search() {
        let mut settings = settings(vec![
            agent("Advisor", AgentRole::Primary, &["Zoning"]),
            agent("Zoning", AgentRole::Sub, &[]),
        ]);
        settings.documents.target_agent = Some("Zoning".to_string());
        assert!(ConfigValidator::validate(&settings).is_err());

        settings.agents[1].document_search = true;
        assert!(ConfigValidator::validate(&settings).is_ok());
    }

    #[test]
    fn test_unknown_connection() {
        let mut advisor = agent("Advisor", AgentRole::Primary, &[]);
        advisor.web_search = Some("bing".to_string());
        let settings = settings(vec![advisor]);
        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::CrossReference(_))));
    }
}
