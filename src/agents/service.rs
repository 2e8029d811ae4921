//! Chat service
//!
//! One call surface over the thread store, agent registry, router and
//! document indexer. Front ends (REPL, REST) talk only to this type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::bootstrap::Bootstrapper;
use super::domain::{Agent, AgentInfo, AssistantReply, DocumentHandle, Message, Thread, ThreadSummary, TurnStream};
use super::error::{AgentError, AgentResult, RemoteError};
use super::hosting::{AgentHost, FoundryHost, InMemoryHost, RetryPolicy};
use super::indexer::{check_format, DocumentIndexer, IndexBackend};
use super::memory::MemoryStrategy;
use super::prompts::PromptCatalog;
use super::registry::AgentRegistry;
use super::router::{DelegationRouter, RouterConfig};
use super::threads::ThreadStore;
use super::tools::{ApiPort, BingWebSearch, HttpApiInvoker, ToolRegistry, WebSearchPort};
use crate::config::{HostingBackend, Settings};

pub struct ChatService {
    threads: Arc<ThreadStore>,
    agents: Arc<AgentRegistry>,
    tools: ToolRegistry,
    indexer: Arc<DocumentIndexer>,
    router: DelegationRouter,
    primary: String,
    document_agent: Option<String>,
}

/// Builder for [`ChatService`]
pub struct ChatServiceBuilder {
    host: Arc<dyn AgentHost>,
    index: Arc<dyn IndexBackend>,
    primary: String,
    router: RouterConfig,
    retry: RetryPolicy,
    document_agent: Option<String>,
    top_k: usize,
    web: Option<Arc<dyn WebSearchPort>>,
    api: Option<Arc<dyn ApiPort>>,
    windows: HashMap<String, MemoryStrategy>,
}

impl ChatServiceBuilder {
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Agent that receives uploaded documents
    pub fn document_agent(mut self, agent: Option<String>) -> Self {
        self.document_agent = agent;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn web_search(mut self, web: Arc<dyn WebSearchPort>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn api(mut self, api: Arc<dyn ApiPort>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn windows(mut self, windows: HashMap<String, MemoryStrategy>) -> Self {
        self.windows = windows;
        self
    }

    pub fn build(self) -> ChatService {
        let agents = Arc::new(AgentRegistry::new(self.host.clone(), self.retry.clone()));
        let threads = Arc::new(ThreadStore::new(self.host));
        let indexer = Arc::new(DocumentIndexer::new(
            self.index,
            agents.clone(),
            self.top_k,
            self.retry.clone(),
        ));

        let mut router = DelegationRouter::new(threads.clone(), agents.clone(), self.router, self.retry)
            .with_indexer(indexer.clone())
            .with_windows(self.windows);
        if let Some(web) = self.web {
            router = router.with_web_search(web);
        }
        if let Some(api) = self.api {
            router = router.with_api(api);
        }

        ChatService {
            threads,
            tools: ToolRegistry::new(agents.clone()),
            agents,
            indexer,
            router,
            primary: self.primary,
            document_agent: self.document_agent,
        }
    }
}

impl ChatService {
    pub fn builder(
        host: Arc<dyn AgentHost>,
        index: Arc<dyn IndexBackend>,
        primary: impl Into<String>,
        router: RouterConfig,
    ) -> ChatServiceBuilder {
        ChatServiceBuilder {
            host,
            index,
            primary: primary.into(),
            router,
            retry: RetryPolicy::default(),
            document_agent: None,
            top_k: 5,
            web: None,
            api: None,
            windows: HashMap::new(),
        }
    }

    /// Wire every component from settings and bootstrap the agents
    pub async fn from_settings(settings: &Settings) -> AgentResult<Self> {
        let max_tool_rounds = settings
            .router
            .max_tool_rounds
            .ok_or_else(|| AgentError::Configuration("router.max_tool_rounds is required".to_string()))?;
        let primary = settings
            .primary_agent()
            .ok_or_else(|| AgentError::Configuration("no primary agent is configured".to_string()))?
            .name
            .clone();

        let mut router = RouterConfig::new(max_tool_rounds);
        router.stream_buffer = settings.router.stream_buffer;
        router.search_top_k = settings.documents.top_k;
        router.temperature = settings.hosting.temperature;

        let (host, index): (Arc<dyn AgentHost>, Arc<dyn IndexBackend>) = match settings.hosting.backend {
            HostingBackend::Foundry => {
                let foundry = Arc::new(FoundryHost::new(&settings.hosting)?);
                let host: Arc<dyn AgentHost> = foundry.clone();
                let index: Arc<dyn IndexBackend> = foundry;
                (host, index)
            }
            HostingBackend::InMemory => {
                let memory = Arc::new(InMemoryHost::new());
                let host: Arc<dyn AgentHost> = memory.clone();
                let index: Arc<dyn IndexBackend> = memory;
                (host, index)
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.hosting.timeout_seconds))
            .build()
            .map_err(RemoteError::from)?;
        let retry = settings.hosting.retry.clone();
        let windows = settings
            .agents
            .iter()
            .map(|a| (a.name.clone(), a.memory.clone()))
            .collect();

        let service = Self::builder(host, index, primary, router)
            .retry(retry.clone())
            .document_agent(settings.documents.target_agent.clone())
            .top_k(settings.documents.top_k)
            .web_search(Arc::new(BingWebSearch::new(client.clone(), &settings.connections, retry)))
            .api(Arc::new(HttpApiInvoker::new(client, &settings.connections)))
            .windows(windows)
            .build();

        let prompts = PromptCatalog::load(&settings.prompts.dir)?;
        service.bootstrap(settings, &prompts).await?;
        Ok(service)
    }

    /// Ensure the configured agents exist and match their definitions
    pub async fn bootstrap(&self, settings: &Settings, prompts: &PromptCatalog) -> AgentResult<Vec<Agent>> {
        Bootstrapper::new(settings, prompts, self.agents.clone()).run().await
    }

    pub fn primary_agent(&self) -> &str {
        &self.primary
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.agents.clone()
    }

    pub fn router(&self) -> &DelegationRouter {
        &self.router
    }

    pub async fn agents(&self) -> Vec<AgentInfo> {
        self.agents.list().await.iter().map(AgentInfo::from).collect()
    }

    // ---------- threads ----------

    pub async fn create_thread(&self, name: &str) -> AgentResult<Thread> {
        self.threads.create(name).await
    }

    /// Create `thread-N` with the first free N, counting from the number of threads
    pub async fn new_thread(&self) -> AgentResult<Thread> {
        let mut n = self.threads.list().await.len() + 1;
        while self.threads.contains(&format!("thread-{}", n)).await {
            n += 1;
        }
        self.threads.create(&format!("thread-{}", n)).await
    }

    pub async fn list_threads(&self) -> Vec<ThreadSummary> {
        self.threads.list().await
    }

    pub async fn history(&self, name: &str) -> AgentResult<Vec<Message>> {
        Ok(self.threads.get(name).await?.messages)
    }

    /// History rendered as `Role: text` lines
    pub async fn history_lines(&self, name: &str) -> AgentResult<Vec<String>> {
        Ok(self.threads.get(name).await?.history_lines())
    }

    pub async fn delete_thread(&self, name: &str) -> AgentResult<()> {
        self.threads.delete(name).await
    }

    pub async fn delete_all(&self) -> AgentResult<usize> {
        let deleted = self.threads.delete_all().await?;
        info!(deleted, "Deleted all threads");
        Ok(deleted)
    }

    // ---------- turns ----------

    /// Send a user message to the primary agent and wait for the answer
    pub async fn send_message(&self, thread: &str, text: &str) -> AgentResult<AssistantReply> {
        self.router.run_turn(thread, &self.primary, text).await
    }

    /// Like [`send_message`](Self::send_message), observed as a stream
    pub async fn stream_message(&self, thread: &str, text: &str) -> AgentResult<TurnStream> {
        if !self.threads.contains(thread).await {
            return Err(AgentError::NotFound(format!("thread '{}'", thread)));
        }
        Ok(self.router.stream_turn(thread, &self.primary, text))
    }

    // ---------- documents ----------

    fn document_target(&self) -> AgentResult<&str> {
        self.document_agent
            .as_deref()
            .ok_or_else(|| AgentError::Configuration("documents.target_agent is not set".to_string()))
    }

    /// Index a document and bind it to the document agent.
    ///
    /// Nothing is uploaded when the agent already holds an index.
    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> AgentResult<DocumentHandle> {
        check_format(file_name)?;
        let agent = self.document_target()?;
        self.indexer.ensure_unbound(agent, file_name).await?;

        let handle = self.indexer.upload(bytes, file_name).await?;
        if let Err(e) = self.indexer.attach_to_agent(&handle, agent).await {
            self.indexer.discard(&handle.index_id).await;
            return Err(e);
        }
        Ok(handle)
    }

    /// Index `files` together, then swap the new index in for the document
    /// agent's current one. The old index stays bound if the upload fails.
    pub async fn replace_documents(&self, files: Vec<(Vec<u8>, String)>) -> AgentResult<Vec<DocumentHandle>> {
        for (_, name) in &files {
            check_format(name)?;
        }
        let agent = self.document_target()?;
        self.agents.get_agent(agent).await?;

        let handles = self.indexer.upload_batch(files).await?;
        if let Err(e) = self.swap_index(agent, &handles[0]).await {
            self.indexer.discard(&handles[0].index_id).await;
            return Err(e);
        }
        Ok(handles)
    }

    async fn swap_index(&self, agent: &str, handle: &DocumentHandle) -> AgentResult<()> {
        if let Some(old) = self.indexer.release(agent).await? {
            info!(agent = %agent, old = %old, new = %handle.index_id, "Replacing document index");
        }
        self.indexer.attach_to_agent(handle, agent).await
    }

    pub fn indexer(&self) -> Arc<DocumentIndexer> {
        self.indexer.clone()
    }
}
