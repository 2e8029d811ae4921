use real_analyst::agents::tools::ApiSpec;
use real_analyst::agents::{AgentRole, ApiAuthMode, ChatService, PromptCatalog};
use real_analyst::config::{HostingBackend, Settings};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const BASE: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[hosting]
backend = "in_memory"

[router]
max_tool_rounds = 6

[[connections]]
name = "rentcast"
header = "X-Api-Key"
key_env = "RENTCAST_API_KEY"

[[agents]]
name = "InvestmentAdvisorAgent"
role = "primary"
instructions = "Advise."
delegates_to = [{ agent = "ZoningAdvisorAgent" }, { agent = "ValuationExpertAgent" }]
"#;

#[test]
fn test_load_external_agent_definitions() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("config/agents"))?;
    fs::write(root.join("real-analyst.toml"), BASE)?;

    let zoning_yaml = r#"
name: ZoningAdvisorAgent
instructions: Answer zoning questions.
document_search: true
memory:
  type: sliding_window
  size: 10
"#;
    fs::write(root.join("config/agents/zoning.yaml"), zoning_yaml)?;

    let valuation_json = r#"
{
    "name": "ValuationExpertAgent",
    "template": "valuation_expert.j2",
    "api_tools": [
        {
            "name": "rentcast_api",
            "spec": "openapi_schemas/rentcast.json",
            "auth": { "type": "connection", "connection": "rentcast" }
        }
    ]
}
"#;
    fs::write(root.join("config/agents/valuation.json"), valuation_json)?;
    fs::write(root.join("config/agents/notes.md"), "ignored")?;

    let settings = Settings::from_root(root)?;

    assert_eq!(settings.agents.len(), 3);
    assert_eq!(settings.primary_agent().map(|a| a.name.as_str()), Some("InvestmentAdvisorAgent"));
    assert_eq!(settings.agent("ZoningAdvisorAgent").map(|a| a.role), Some(AgentRole::Sub));

    // relative paths are anchored at the config root
    assert_eq!(settings.prompts.dir, root.join("prompts"));
    let valuation = settings.agent("ValuationExpertAgent").unwrap();
    assert_eq!(
        Path::new(&valuation.api_tools[0].spec),
        root.join("openapi_schemas/rentcast.json")
    );
    assert_eq!(
        valuation.api_tools[0].auth,
        ApiAuthMode::Connection {
            connection: "rentcast".to_string()
        }
    );

    let primary = settings.primary_agent().unwrap();
    assert_eq!(primary.tool_names(), vec!["zoning_advisor", "valuation_expert"]);

    Ok(())
}

#[test]
fn test_missing_round_limit_is_rejected() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let config = BASE.replace("max_tool_rounds = 6", "");
    fs::write(temp_dir.path().join("real-analyst.toml"), config)?;

    let err = Settings::from_root(temp_dir.path()).unwrap_err().to_string();
    assert!(err.contains("router.max_tool_rounds"), "{}", err);
    Ok(())
}

#[test]
fn test_delegation_cycle_is_rejected() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let config = format!(
        "{}\n{}",
        BASE,
        r#"
[[agents]]
name = "ZoningAdvisorAgent"
instructions = "Zoning."
delegates_to = [{ agent = "ValuationExpertAgent" }]

[[agents]]
name = "ValuationExpertAgent"
instructions = "Values."
delegates_to = [{ agent = "ZoningAdvisorAgent" }]
"#
    );
    fs::write(temp_dir.path().join("real-analyst.toml"), config)?;

    let err = Settings::from_root(temp_dir.path()).unwrap_err().to_string();
    assert!(err.contains("Delegation cycle"), "{}", err);
    Ok(())
}

fn shipped_settings() -> anyhow::Result<Settings> {
    Settings::from_root(env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn test_shipped_config_and_assets() -> anyhow::Result<()> {
    let settings = shipped_settings()?;
    assert_eq!(settings.hosting.backend, HostingBackend::Foundry);
    assert_eq!(settings.documents.target_agent.as_deref(), Some("ZoningAdvisorAgent"));

    let prompts = PromptCatalog::load(&settings.prompts.dir)?;
    for agent in &settings.agents {
        let text = prompts.render_instructions(agent)?;
        assert!(text.contains("# Role"), "{} lacks a Role section", agent.name);
        assert!(text.contains("# Output Format"), "{} lacks an Output Format section", agent.name);
    }
    Ok(())
}

#[tokio::test]
async fn test_rentcast_document_parses() -> anyhow::Result<()> {
    let settings = shipped_settings()?;
    let valuation = settings.agent("ValuationExpertAgent").unwrap();

    let spec = ApiSpec::load(&valuation.api_tools[0].spec).await?;
    assert_eq!(spec.base_url, "https://api.rentcast.io/v1");
    for op in ["getProperties", "getValueEstimate", "getRentEstimate", "getMarketStatistics"] {
        assert!(spec.operation(op).is_some(), "missing {}", op);
    }
    assert_eq!(spec.operation("getPropertyById").unwrap().path_params, vec!["id"]);
    Ok(())
}

#[tokio::test]
async fn test_shipped_config_bootstraps_offline() -> anyhow::Result<()> {
    let mut settings = shipped_settings()?;
    settings.hosting.backend = HostingBackend::InMemory;

    let service = ChatService::from_settings(&settings).await?;
    let agents = service.agents().await;
    assert_eq!(agents.len(), 3);

    let valuation = agents.iter().find(|a| a.name == "ValuationExpertAgent").unwrap();
    assert_eq!(valuation.tools, vec!["rentcast_api", "web_search"]);
    let zoning = agents.iter().find(|a| a.name == "ZoningAdvisorAgent").unwrap();
    assert_eq!(zoning.tools, vec!["web_search", "document_search"]);
    Ok(())
}
