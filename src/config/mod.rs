use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub mod validator;

use crate::agents::domain::{AgentRole, ApiAuthMode};
use crate::agents::hosting::RetryPolicy;
use crate::agents::memory::MemoryStrategy;
use crate::cli::Cli;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub hosting: HostingSettings,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub prompts: PromptSettings,
    #[serde(default)]
    pub documents: DocumentSettings,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Named search and API connections
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Which agent-hosting backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HostingBackend {
    /// Azure AI Foundry style HTTP service
    #[default]
    Foundry,
    /// Everything in process; nothing survives a restart
    InMemory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostingSettings {
    #[serde(default)]
    pub backend: HostingBackend,
    /// Project endpoint serving agents, threads, files and vector stores
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Resource endpoint serving chat completions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_endpoint: Option<String>,
    /// Model deployment name
    #[serde(default = "default_deployment")]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_deployment() -> String {
    "gpt-4o".to_string()
}

fn default_api_version() -> String {
    "2024-10-21".to_string()
}

fn default_api_key_env() -> String {
    "AZURE_AI_API_KEY".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for HostingSettings {
    fn default() -> Self {
        Self {
            backend: HostingBackend::default(),
            endpoint: None,
            inference_endpoint: None,
            deployment: default_deployment(),
            api_version: default_api_version(),
            api_key_env: default_api_key_env(),
            timeout_seconds: default_timeout(),
            temperature: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterSettings {
    /// Cycle guard. Must be set explicitly; there is no implied default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_rounds: Option<u32>,
    /// Channel capacity for streamed turns
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_stream_buffer() -> usize {
    64
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: None,
            stream_buffer: default_stream_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptSettings {
    /// Directory holding `*.j2` instruction templates
    #[serde(default = "default_prompt_dir")]
    pub dir: PathBuf,
}

fn default_prompt_dir() -> PathBuf {
    PathBuf::from("prompts")
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            dir: default_prompt_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentSettings {
    /// Agent receiving uploaded documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    /// Passages returned per search
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            target_agent: None,
            top_k: default_top_k(),
        }
    }
}

/// Declarative definition of one agent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Unique agent name
    pub name: String,
    #[serde(default)]
    pub role: AgentRole,
    /// Used as the tool description when another agent delegates here
    #[serde(default)]
    pub description: String,
    /// Template file name under the prompts directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Inline instructions, rendered with Tera
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Extra template variables
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub delegates_to: Vec<DelegateConfig>,
    #[serde(default)]
    pub api_tools: Vec<ApiToolConfig>,
    /// Connection name backing a web search tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search: Option<String>,
    /// Attach a document search tool over the agent's bound index
    #[serde(default)]
    pub document_search: bool,
    #[serde(default)]
    pub memory: MemoryStrategy,
}

impl AgentConfig {
    /// Names of every tool this agent will carry, in attachment order
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.delegates_to.iter().map(DelegateConfig::tool_name).collect();
        names.extend(self.api_tools.iter().map(|t| t.name.clone()));
        if self.web_search.is_some() {
            names.push(WEB_SEARCH_TOOL.to_string());
        }
        if self.document_search {
            names.push(DOCUMENT_SEARCH_TOOL.to_string());
        }
        names
    }
}

/// Tool name given to web search bindings
pub const WEB_SEARCH_TOOL: &str = "web_search";

/// Tool name given to document search bindings
pub const DOCUMENT_SEARCH_TOOL: &str = "document_search";

/// A sub-agent exposed as a tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelegateConfig {
    /// Target agent name
    pub agent: String,
    /// Tool name; derived from the agent name when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DelegateConfig {
    pub fn tool_name(&self) -> String {
        self.tool.clone().unwrap_or_else(|| derive_tool_name(&self.agent))
    }
}

/// `ZoningAdvisorAgent` -> `zoning_advisor`
pub fn derive_tool_name(agent: &str) -> String {
    let base = agent.strip_suffix("Agent").unwrap_or(agent);
    let mut out = String::with_capacity(base.len() + 4);
    for (i, ch) in base.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out
}

/// An OpenAPI-described API exposed as a tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Path of the OpenAPI document, relative to the config root
    pub spec: String,
    #[serde(default)]
    pub auth: ApiAuthMode,
}

/// Named connection to an external service
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub name: String,
    /// Base URL; overrides the API document's server for API tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Header carrying the credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Environment variable containing the credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_env: Option<String>,
}

impl ConnectionConfig {
    /// Credential header and value, when both are available
    pub fn credential(&self) -> Option<(String, String)> {
        let header = self.header.clone()?;
        let key = std::env::var(self.key_env.as_ref()?).ok()?;
        Some((header, key))
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_root(".")
    }

    /// Create settings from CLI arguments (config file, environment, then CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let root = cli
            .config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut settings = Self::load(cli.config.clone())?;
        settings.apply_cli_overrides(cli);
        settings.finish(&root)?;
        Ok(settings)
    }

    /// Load `<root>/real-analyst.{toml,yaml,json}` plus `<root>/config/agents/*`
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let root = root.as_ref();
        let mut settings = Self::load(root.join("real-analyst"))?;
        settings.finish(root)?;
        Ok(settings)
    }

    fn load(config_path: PathBuf) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(config_path).required(false))
            .add_source(
                Environment::with_prefix("REAL_ANALYST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8000)?
            .build()?;

        Ok(s.try_deserialize()?)
    }

    fn finish(&mut self, root: &Path) -> Result<(), anyhow::Error> {
        self.load_agents_from_dir(&root.join("config").join("agents"))?;
        self.resolve_paths(root);

        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }

    /// Apply CLI argument overrides to settings
    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(backend) = cli.backend {
            self.hosting.backend = backend;
        }
        if let Some(rounds) = cli.max_tool_rounds {
            self.router.max_tool_rounds = Some(rounds);
        }
    }

    /// Make relative template and API document paths relative to the config root
    fn resolve_paths(&mut self, root: &Path) {
        if self.prompts.dir.is_relative() {
            self.prompts.dir = root.join(&self.prompts.dir);
        }
        for agent in &mut self.agents {
            for tool in &mut agent.api_tools {
                let spec = Path::new(&tool.spec);
                if spec.is_relative() {
                    tool.spec = root.join(spec).to_string_lossy().into_owned();
                }
            }
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// The single primary agent; the validator guarantees there is one
    pub fn primary_agent(&self) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.role == AgentRole::Primary)
    }

    /// Merge another Settings into this one; agents and connections merge by name.
    pub fn merge(&mut self, other: Settings) {
        self.server = other.server;
        self.hosting = other.hosting;
        self.router = other.router;
        self.prompts = other.prompts;
        self.documents = other.documents;
        Self::merge_vec_by_key(&mut self.agents, other.agents, |a| a.name.clone());
        Self::merge_vec_by_key(&mut self.connections, other.connections, |c| c.name.clone());
    }

    /// Items from `other` override items in `base` with the same key; new items are appended.
    fn merge_vec_by_key<T, K, F>(base: &mut Vec<T>, other: Vec<T>, key_fn: F)
    where
        K: Eq + std::hash::Hash,
        F: Fn(&T) -> K,
    {
        use std::collections::HashMap;

        let mut key_to_index: HashMap<K, usize> = HashMap::new();
        for (i, item) in base.iter().enumerate() {
            key_to_index.insert(key_fn(item), i);
        }

        for item in other {
            let key = key_fn(&item);
            if let Some(&idx) = key_to_index.get(&key) {
                base[idx] = item;
            } else {
                base.push(item);
            }
        }
    }

    fn load_agents_from_dir(&mut self, path: &Path) -> Result<(), anyhow::Error> {
        let pattern = format!("{}/*", path.display());
        let mut loaded = Vec::new();
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) => {
                    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                        if matches!(ext, "json" | "yaml" | "yml" | "toml") {
                            let content = std::fs::read_to_string(&path)?;
                            let agent: AgentConfig = match ext {
                                "json" => serde_json::from_str(&content)?,
                                "toml" => toml::from_str(&content)?,
                                _ => serde_yaml::from_str(&content)?,
                            };
                            tracing::debug!(agent = %agent.name, file = %path.display(), "Loaded agent definition");
                            loaded.push(agent);
                        }
                    }
                }
                Err(e) => tracing::warn!("Failed to read glob entry: {}", e),
            }
        }
        Self::merge_vec_by_key(&mut self.agents, loaded, |a| a.name.clone());
        Ok(())
    }
}
