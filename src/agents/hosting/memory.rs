//! In-process hosting backend
//!
//! Holds agents, threads and document indexes in memory and answers
//! completions from per-agent scripts. Used for offline runs and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::{AgentHost, CompletionRequest, FinishReason, HostStream, StreamChunk, ToolCallDelta};
use crate::agents::domain::{
    Agent, AgentDefinition, AgentId, FileId, IndexId, Passage, ThreadRef, ToolCall,
};
use crate::agents::error::{RemoteError, RemoteResult};
use crate::agents::indexer::IndexBackend;

/// One scripted model response
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Final text answer
    Text(String),
    /// Request these tool calls
    ToolCalls(Vec<ToolCall>),
    /// Fail mid-stream
    Fail(RemoteError),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedReply::Text(content.into())
    }

    /// A single tool call with a generated id
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        ScriptedReply::ToolCalls(vec![ToolCall::new(ToolCall::generate_id(), name, arguments)])
    }
}

#[derive(Default)]
struct Index {
    files: Vec<FileId>,
}

/// In-memory hosting service
#[derive(Default)]
pub struct InMemoryHost {
    agents: RwLock<HashMap<AgentId, Agent>>,
    threads: RwLock<HashSet<ThreadRef>>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    defaults: Mutex<HashMap<String, ScriptedReply>>,
    failures: Mutex<VecDeque<RemoteError>>,
    upload_failures: Mutex<VecDeque<RemoteError>>,
    requests: Mutex<Vec<CompletionRequest>>,
    deleted_threads: Mutex<Vec<ThreadRef>>,
    files: RwLock<HashMap<FileId, (String, String)>>,
    indexes: RwLock<HashMap<IndexId, Index>>,
    latency: Option<Duration>,
    next_id: AtomicU64,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every completion, to make overlapping turns observable
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Queue replies for the named agent, consumed in order
    pub async fn script(&self, agent: &str, replies: impl IntoIterator<Item = ScriptedReply>) {
        self.scripts
            .lock()
            .await
            .entry(agent.to_string())
            .or_default()
            .extend(replies);
    }

    /// Reply used whenever the agent's queue is empty
    pub async fn set_default_reply(&self, agent: &str, reply: ScriptedReply) {
        self.defaults.lock().await.insert(agent.to_string(), reply);
    }

    /// Fail the next `n` completions before their stream starts
    pub async fn fail_next(&self, n: usize, error: RemoteError) {
        let mut failures = self.failures.lock().await;
        failures.extend(std::iter::repeat(error).take(n));
    }

    /// Fail the next `n` file uploads
    pub async fn fail_next_uploads(&self, n: usize, error: RemoteError) {
        let mut failures = self.upload_failures.lock().await;
        failures.extend(std::iter::repeat(error).take(n));
    }

    /// Every completion request received so far
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn agent_by_name(&self, name: &str) -> Option<Agent> {
        self.agents.read().await.values().find(|a| a.name == name).cloned()
    }

    pub fn created_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updated_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn deleted_threads(&self) -> Vec<ThreadRef> {
        self.deleted_threads.lock().await.clone()
    }

    pub async fn index_exists(&self, index: &IndexId) -> bool {
        self.indexes.read().await.contains_key(index)
    }

    pub async fn index_count(&self) -> usize {
        self.indexes.read().await.len()
    }

    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }

    async fn next_reply(&self, request: &CompletionRequest) -> ScriptedReply {
        if let Some(reply) = self
            .scripts
            .lock()
            .await
            .get_mut(&request.agent_name)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        if let Some(reply) = self.defaults.lock().await.get(&request.agent_name) {
            return reply.clone();
        }
        ScriptedReply::Text(format!(
            "[{}] {}",
            request.agent_name,
            request.last_input().unwrap_or_default()
        ))
    }
}

#[async_trait]
impl AgentHost for InMemoryHost {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn list_agents(&self) -> RemoteResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    async fn create_agent(&self, definition: &AgentDefinition) -> RemoteResult<AgentId> {
        let id = AgentId::new(self.next_id("asst"));
        let agent = Agent::from_definition(id.clone(), definition.clone());
        self.agents.write().await.insert(id.clone(), agent);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn update_agent(&self, id: &AgentId, definition: &AgentDefinition) -> RemoteResult<()> {
        let mut agents = self.agents.write().await;
        if !agents.contains_key(id) {
            return Err(RemoteError::Api {
                status: 404,
                message: format!("No assistant found with id '{}'", id),
            });
        }
        agents.insert(id.clone(), Agent::from_definition(id.clone(), definition.clone()));
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_thread(&self) -> RemoteResult<ThreadRef> {
        let thread = ThreadRef::new(self.next_id("thread"));
        self.threads.write().await.insert(thread.clone());
        Ok(thread)
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> RemoteResult<()> {
        self.threads.write().await.remove(thread);
        self.deleted_threads.lock().await.push(thread.clone());
        Ok(())
    }

    async fn complete(&self, request: CompletionRequest) -> RemoteResult<HostStream> {
        self.requests.lock().await.push(request.clone());

        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self.next_reply(&request).await;
        let (sender, stream) = HostStream::channel(64);

        tokio::spawn(async move {
            match reply {
                ScriptedReply::Text(text) => {
                    for word in text.split_inclusive(' ') {
                        if sender.send(StreamChunk::text(word)).await.is_err() {
                            return;
                        }
                    }
                    let _ = sender.send(StreamChunk::finish(FinishReason::Stop)).await;
                }
                ScriptedReply::ToolCalls(calls) => {
                    for (index, call) in calls.iter().enumerate() {
                        let delta = ToolCallDelta::complete(index, call);
                        if sender.send(StreamChunk::tool_call(delta)).await.is_err() {
                            return;
                        }
                    }
                    let _ = sender.send(StreamChunk::finish(FinishReason::ToolCalls)).await;
                }
                ScriptedReply::Fail(error) => {
                    let _ = sender.send_error(error).await;
                }
            }
        });

        Ok(stream)
    }
}

#[async_trait]
impl IndexBackend for InMemoryHost {
    async fn upload_file(&self, bytes: Vec<u8>, file_name: &str) -> RemoteResult<FileId> {
        if let Some(error) = self.upload_failures.lock().await.pop_front() {
            return Err(error);
        }
        let id = FileId::new(self.next_id("file"));
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.files
            .write()
            .await
            .insert(id.clone(), (file_name.to_string(), text));
        Ok(id)
    }

    async fn create_index(&self, _name: &str, files: &[FileId]) -> RemoteResult<IndexId> {
        let known = self.files.read().await;
        if let Some(missing) = files.iter().find(|f| !known.contains_key(f)) {
            return Err(RemoteError::InvalidRequest(format!("unknown file '{}'", missing)));
        }
        let id = IndexId::new(self.next_id("vs"));
        self.indexes.write().await.insert(
            id.clone(),
            Index {
                files: files.to_vec(),
            },
        );
        Ok(id)
    }

    /// Ranks files by how many query terms they contain
    async fn search(&self, index: &IndexId, query: &str, top_k: usize) -> RemoteResult<Vec<Passage>> {
        let indexes = self.indexes.read().await;
        let index = indexes.get(index).ok_or_else(|| RemoteError::Api {
            status: 404,
            message: format!("No vector store found with id '{}'", index),
        })?;

        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let files = self.files.read().await;

        let mut hits: Vec<Passage> = index
            .files
            .iter()
            .filter_map(|id| files.get(id))
            .filter_map(|(name, text)| {
                let lower = text.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                (matched > 0).then(|| {
                    Passage::new(text.clone())
                        .with_source(name.clone())
                        .with_score(matched as f32 / terms.len() as f32)
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_index(&self, index: &IndexId) -> RemoteResult<()> {
        self.indexes.write().await.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::domain::{AgentRole, ThreadRef};
    use serde_json::json;

    fn request(agent: &str) -> CompletionRequest {
        CompletionRequest {
            agent: AgentId::new("asst_1"),
            agent_name: agent.to_string(),
            thread: ThreadRef::new("thread_1"),
            messages: vec![super::super::ChatMessage::user("What is the cap rate?")],
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let host = InMemoryHost::new();
        host.script("A", [ScriptedReply::tool_call("zoning_advisor", json!({"query": "R-2"}))])
            .await;

        let first = host.complete(request("A")).await.unwrap().collect().await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "zoning_advisor");

        let second = host.complete(request("A")).await.unwrap().collect().await.unwrap();
        assert_eq!(second.content, "[A] What is the cap rate?");
        assert_eq!(host.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_fail_next_is_pre_stream() {
        let host = InMemoryHost::new();
        host.fail_next(1, RemoteError::Timeout).await;
        assert!(matches!(host.complete(request("A")).await, Err(RemoteError::Timeout)));
        assert!(host.complete(request("A")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_unknown_agent() {
        let host = InMemoryHost::new();
        let def = AgentDefinition::new("A", AgentRole::Primary, "hi");
        assert!(host.update_agent(&AgentId::new("nope"), &def).await.is_err());
        let id = host.create_agent(&def).await.unwrap();
        assert!(host.update_agent(&id, &def).await.is_ok());
        assert_eq!((host.created_count(), host.updated_count()), (1, 1));
    }

    #[tokio::test]
    async fn test_term_overlap_search() {
        let host = InMemoryHost::new();
        let a = host.upload_file(b"Parcel is zoned R-2 residential".to_vec(), "a.txt").await.unwrap();
        let b = host.upload_file(b"Annual taxes are 4,200".to_vec(), "b.txt").await.unwrap();
        let index = host.create_index("docs", &[a, b]).await.unwrap();

        let hits = host.search(&index, "zoned residential", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source.as_deref(), Some("a.txt"));
    }
}
