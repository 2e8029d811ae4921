#![allow(dead_code)]

use async_trait::async_trait;
use real_analyst::agents::hosting::{InMemoryHost, RetryPolicy};
use real_analyst::agents::tools::WebSearchPort;
use real_analyst::agents::{AgentResult, ChatService, Passage, PromptCatalog, RouterConfig};
use real_analyst::config::Settings;
use std::sync::Arc;

pub const PRIMARY: &str = "InvestmentAdvisorAgent";
pub const ZONING: &str = "ZoningAdvisorAgent";
pub const VALUATION: &str = "ValuationExpertAgent";

pub const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 8000

[hosting]
backend = "in_memory"

[router]
max_tool_rounds = 4

[documents]
target_agent = "ZoningAdvisorAgent"
top_k = 3

[[connections]]
name = "bing"

[[agents]]
name = "InvestmentAdvisorAgent"
role = "primary"
instructions = "Advise on {{ market }} deals."
context = { market = "Austin" }
delegates_to = [
    { agent = "ZoningAdvisorAgent", tool = "zoning_advisor" },
    { agent = "ValuationExpertAgent", tool = "valuation_expert" },
]

[[agents]]
name = "ValuationExpertAgent"
description = "Values properties"
instructions = "Estimate values."
web_search = "bing"

[[agents]]
name = "ZoningAdvisorAgent"
description = "Answers zoning questions"
instructions = "Answer zoning questions from the documents."
document_search = true
"#;

/// Web search returning one fixed passage per query
pub struct StaticSearch;

#[async_trait]
impl WebSearchPort for StaticSearch {
    async fn search(&self, connection: &str, query: &str, _top_k: usize) -> AgentResult<Vec<Passage>> {
        Ok(vec![Passage::new(format!("{} result for {}", connection, query)).with_source("https://example.com")])
    }
}

pub struct Harness {
    pub host: Arc<InMemoryHost>,
    pub service: Arc<ChatService>,
    pub settings: Settings,
}

pub fn settings() -> Settings {
    toml::from_str(CONFIG).expect("test config parses")
}

pub async fn harness() -> Harness {
    harness_with(InMemoryHost::new(), 4).await
}

pub async fn harness_with(host: InMemoryHost, max_tool_rounds: u32) -> Harness {
    let host = Arc::new(host);
    let mut settings = settings();
    settings.router.max_tool_rounds = Some(max_tool_rounds);

    let service = ChatService::builder(host.clone(), host.clone(), PRIMARY, RouterConfig::new(max_tool_rounds))
        .retry(RetryPolicy::none())
        .document_agent(settings.documents.target_agent.clone())
        .top_k(settings.documents.top_k)
        .web_search(Arc::new(StaticSearch))
        .build();
    service
        .bootstrap(&settings, &PromptCatalog::empty())
        .await
        .expect("bootstrap succeeds");

    Harness {
        host,
        service: Arc::new(service),
        settings,
    }
}
