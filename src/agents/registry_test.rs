use std::sync::Arc;

use super::domain::*;
use super::error::AgentError;
use super::hosting::{AgentHost, InMemoryHost, RetryPolicy};
use super::registry::AgentRegistry;
use super::tools::ToolRegistry;

fn registry() -> (Arc<InMemoryHost>, Arc<AgentRegistry>) {
    let host = Arc::new(InMemoryHost::new());
    let registry = Arc::new(AgentRegistry::new(host.clone(), RetryPolicy::none()));
    (host, registry)
}

fn valuation() -> AgentDefinition {
    AgentDefinition::new("ValuationExpertAgent", AgentRole::Sub, "Estimate property values.")
}

#[tokio::test]
async fn test_ensure_agent_is_idempotent() {
    let (host, registry) = registry();

    let first = registry.ensure_agent(valuation()).await.unwrap();
    let second = registry.ensure_agent(valuation()).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(host.created_count(), 1);
    assert_eq!(host.updated_count(), 0);
    assert_eq!(registry.list().await.len(), 1);
}

#[tokio::test]
async fn test_ensure_agent_survives_restart() {
    let (host, registry) = registry();
    let created = registry.ensure_agent(valuation()).await.unwrap();

    // a fresh registry over the same hosting service finds the record
    let restarted = AgentRegistry::new(host.clone(), RetryPolicy::none());
    let again = restarted.ensure_agent(valuation()).await.unwrap();
    assert_eq!(again.id, created.id);
    assert_eq!(host.created_count(), 1);
}

#[tokio::test]
async fn test_drift_updates_in_place() {
    let (host, registry) = registry();
    let created = registry.ensure_agent(valuation()).await.unwrap();

    let changed = AgentDefinition::new("ValuationExpertAgent", AgentRole::Sub, "Estimate values with comps.");
    let updated = registry.ensure_agent(changed).await.unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.instructions, "Estimate values with comps.");
    assert_eq!(host.updated_count(), 1);
    assert_eq!(
        host.agent_by_name("ValuationExpertAgent").await.unwrap().instructions,
        "Estimate values with comps."
    );
}

#[tokio::test]
async fn test_drift_keeps_bound_index() {
    let (_, registry) = registry();
    registry.ensure_agent(valuation()).await.unwrap();
    registry
        .set_index("ValuationExpertAgent", Some(IndexId::new("vs_1")))
        .await
        .unwrap();

    let changed = AgentDefinition::new("ValuationExpertAgent", AgentRole::Sub, "New text");
    let updated = registry.ensure_agent(changed).await.unwrap();
    assert_eq!(updated.attached_index, Some(IndexId::new("vs_1")));
}

#[tokio::test]
async fn test_get_unknown_agent() {
    let (_, registry) = registry();
    assert!(matches!(registry.get_agent("Nobody").await, Err(AgentError::NotFound(_))));
}

#[tokio::test]
async fn test_refresh_rebuilds_cache() {
    let (host, registry) = registry();
    host.create_agent(&valuation()).await.unwrap();
    assert!(registry.list().await.is_empty());

    assert_eq!(registry.refresh().await.unwrap(), 1);
    assert_eq!(registry.list().await[0].name, "ValuationExpertAgent");
}

#[tokio::test]
async fn test_duplicate_tool_leaves_list_unchanged() {
    let (_, registry) = registry();
    registry.ensure_agent(valuation()).await.unwrap();
    registry
        .ensure_agent(AgentDefinition::new("InvestmentAdvisorAgent", AgentRole::Primary, "Advise."))
        .await
        .unwrap();
    let tools = ToolRegistry::new(registry.clone());

    tools
        .register_sub_agent_tool("InvestmentAdvisorAgent", "ValuationExpertAgent", "valuation_expert", "Ask for a value")
        .await
        .unwrap();
    let err = tools
        .register_web_search_tool("InvestmentAdvisorAgent", "valuation_expert", "bing")
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::DuplicateTool { .. }));

    let agent = registry.get_agent("InvestmentAdvisorAgent").await.unwrap();
    assert_eq!(agent.tool_names(), vec!["valuation_expert"]);
    assert_eq!(
        tools.resolve("InvestmentAdvisorAgent", "valuation_expert").await.unwrap().kind(),
        "sub_agent_call"
    );
}

#[tokio::test]
async fn test_ensure_agent_rejects_duplicate_tools() {
    let (host, registry) = registry();
    let definition = valuation().with_tools(vec![
        ToolBinding::web_search("market_search", "bing"),
        ToolBinding::web_search("market_search", "bing"),
    ]);

    let err = registry.ensure_agent(definition).await.unwrap_err();
    assert!(matches!(err, AgentError::DuplicateTool { ref tool, .. } if tool == "market_search"));
    assert_eq!(host.created_count(), 0);
    assert!(registry.list().await.is_empty());
}

#[tokio::test]
async fn test_api_and_document_tools() {
    let (host, registry) = registry();
    registry.ensure_agent(valuation()).await.unwrap();
    let tools = ToolRegistry::new(registry.clone());

    let auth = ApiAuthMode::Connection {
        connection: "rentcast".to_string(),
    };
    tools
        .register_api_tool(
            "ValuationExpertAgent",
            "rentcast_api",
            "RentCast estimates",
            "openapi_schemas/rentcast.json",
            auth.clone(),
        )
        .await
        .unwrap();
    tools
        .register_document_search_tool("ValuationExpertAgent", "document_search", None)
        .await
        .unwrap();

    let err = tools
        .register_document_search_tool("ValuationExpertAgent", "rentcast_api", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::DuplicateTool { .. }));

    let agent = registry.get_agent("ValuationExpertAgent").await.unwrap();
    assert_eq!(agent.tool_names(), vec!["rentcast_api", "document_search"]);
    match tools.resolve("ValuationExpertAgent", "rentcast_api").await.unwrap() {
        ToolBinding::ExternalApiCall { spec_ref, auth: bound, .. } => {
            assert_eq!(spec_ref, "openapi_schemas/rentcast.json");
            assert_eq!(bound, auth);
        }
        other => panic!("unexpected binding {:?}", other),
    }
    assert_eq!(
        tools.resolve("ValuationExpertAgent", "document_search").await.unwrap().kind(),
        "document_search"
    );

    // the remote record carries both tools
    let remote = host.agent_by_name("ValuationExpertAgent").await.unwrap();
    assert_eq!(remote.tool_names(), vec!["rentcast_api", "document_search"]);
}

#[tokio::test]
async fn test_resolve_unknown_tool() {
    let (_, registry) = registry();
    registry.ensure_agent(valuation()).await.unwrap();
    let tools = ToolRegistry::new(registry);

    let err = tools.resolve("ValuationExpertAgent", "web_search").await.unwrap_err();
    assert!(matches!(err, AgentError::UnknownTool { .. }));
}

#[tokio::test]
async fn test_sub_agent_tool_requires_target() {
    let (_, registry) = registry();
    registry.ensure_agent(valuation()).await.unwrap();
    let tools = ToolRegistry::new(registry);

    let err = tools
        .register_sub_agent_tool("ValuationExpertAgent", "GhostAgent", "ghost", "Ask the ghost")
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
}
