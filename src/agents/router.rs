//! Delegation router
//!
//! Runs one conversation turn as a small state machine:
//!
//! ```text
//! AwaitingUserInput -> ModelGenerating -> (ToolCallPending -> ToolExecuting -> ModelGenerating)* -> Completed | Failed
//! ```
//!
//! Tool calls are executed one at a time in the order the model asked for
//! them. A sub-agent call recurses into the delegate's own turn on a child
//! thread; the whole tree of nested turns shares one round budget and one
//! cancellation token. Every ToolCall appended to a log is followed by its
//! ToolResult before the turn moves on, fails or is cancelled.

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::domain::{
    Agent, ApiAuthMode, AssistantReply, IndexId, Message, MessageRole, Thread, ToolBinding, ToolCall,
    ToolCallResult, ToolDefinition, TurnChunk, TurnStatus, TurnStream, TurnStreamSender,
};
use super::error::{AgentError, AgentResult};
use super::hosting::{with_retry, ChatMessage, Completion, CompletionRequest, RetryPolicy, ToolCallAccumulator};
use super::indexer::DocumentIndexer;
use super::memory::{apply_strategy, MemoryStrategy};
use super::registry::AgentRegistry;
use super::threads::ThreadStore;
use super::tools::{ApiPort, ToolRegistry, WebSearchPort};

/// Router limits and knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Model responses requesting tools allowed per turn, nested delegations included
    pub max_tool_rounds: u32,
    pub stream_buffer: usize,
    /// Passages returned by web search
    pub search_top_k: usize,
    pub temperature: Option<f32>,
}

impl RouterConfig {
    pub fn new(max_tool_rounds: u32) -> Self {
        Self {
            max_tool_rounds,
            stream_buffer: 64,
            search_top_k: 5,
            temperature: None,
        }
    }
}

/// State shared by a turn and every turn it delegates to
struct TurnContext {
    rounds: AtomicU32,
    cancel: CancellationToken,
    events: Option<TurnStreamSender>,
}

impl TurnContext {
    fn new(cancel: CancellationToken, events: Option<TurnStreamSender>) -> Self {
        Self {
            rounds: AtomicU32::new(0),
            cancel,
            events,
        }
    }

    async fn emit(&self, chunk: TurnChunk) {
        if let Some(events) = &self.events {
            // a gone consumer also cancels the token
            let _ = events.send(chunk).await;
        }
    }

    fn check_cancelled(&self) -> AgentResult<()> {
        if self.cancel.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn rounds_used(&self) -> u32 {
        self.rounds.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct DelegationRouter {
    threads: Arc<ThreadStore>,
    agents: Arc<AgentRegistry>,
    indexer: Option<Arc<DocumentIndexer>>,
    web: Option<Arc<dyn WebSearchPort>>,
    api: Option<Arc<dyn ApiPort>>,
    windows: Arc<HashMap<String, MemoryStrategy>>,
    config: RouterConfig,
    retry: RetryPolicy,
}

impl DelegationRouter {
    pub fn new(threads: Arc<ThreadStore>, agents: Arc<AgentRegistry>, config: RouterConfig, retry: RetryPolicy) -> Self {
        Self {
            threads,
            agents,
            indexer: None,
            web: None,
            api: None,
            windows: Arc::new(HashMap::new()),
            config,
            retry,
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<DocumentIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_web_search(mut self, web: Arc<dyn WebSearchPort>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn with_api(mut self, api: Arc<dyn ApiPort>) -> Self {
        self.api = Some(api);
        self
    }

    /// History window per agent name; agents not listed replay the full log
    pub fn with_windows(mut self, windows: HashMap<String, MemoryStrategy>) -> Self {
        self.windows = Arc::new(windows);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Run a turn to completion
    pub async fn run_turn(&self, thread: &str, agent: &str, text: &str) -> AgentResult<AssistantReply> {
        let ctx = TurnContext::new(CancellationToken::new(), None);
        self.drive(thread.to_string(), agent.to_string(), text.to_string(), &ctx, 0)
            .await
    }

    /// Run a turn in the background, observing it as a stream.
    ///
    /// Only the primary agent's text is streamed; delegated turns show up as
    /// status, tool-call and tool-result chunks.
    pub fn stream_turn(&self, thread: &str, agent: &str, text: &str) -> TurnStream {
        let (sender, stream) = TurnStream::channel(self.config.stream_buffer);

        let router = self.clone();
        let thread = thread.to_string();
        let agent = agent.to_string();
        let text = text.to_string();

        tokio::spawn(async move {
            let ctx = TurnContext::new(sender.cancellation(), Some(sender.clone()));
            ctx.emit(TurnChunk::status(TurnStatus::Starting)).await;

            match router.drive(thread, agent, text, &ctx, 0).await {
                Ok(reply) => {
                    ctx.emit(TurnChunk::status(TurnStatus::Completed)).await;
                    let _ = sender.send(TurnChunk::complete(reply)).await;
                }
                Err(e) => {
                    ctx.emit(TurnChunk::status(TurnStatus::Failed { error: e.to_string() }))
                        .await;
                    let _ = sender.send_error(e).await;
                }
            }
        });

        stream
    }

    fn drive<'a>(
        &'a self,
        thread_name: String,
        agent_name: String,
        text: String,
        ctx: &'a TurnContext,
        depth: usize,
    ) -> BoxFuture<'a, AgentResult<AssistantReply>> {
        async move {
            let started = Instant::now();
            let agent = self.agents.get_agent(&agent_name).await?;
            let thread = self.threads.get(&thread_name).await?;
            let _turn = self.threads.lock(&thread.id).await?;

            self.threads.append(&thread.id, Message::user(&text)).await?;
            debug!(thread = %thread_name, agent = %agent_name, depth, "Turn started");

            let mut trace = Vec::new();
            match self.run_rounds(&agent, &thread, ctx, depth, &mut trace).await {
                Ok(content) => {
                    self.threads.append(&thread.id, Message::assistant(&content)).await?;
                    let reply = AssistantReply {
                        thread: thread_name,
                        agent: agent_name,
                        content,
                        trace,
                        rounds: ctx.rounds_used(),
                        execution_time_ms: started.elapsed().as_millis() as u64,
                    };
                    info!(thread = %reply.thread, agent = %reply.agent, depth, rounds = reply.rounds, "Turn completed");
                    Ok(reply)
                }
                Err(e) => {
                    if depth == 0 {
                        error!(thread = %thread_name, agent = %agent_name, error = %e, "Turn failed");
                    } else {
                        warn!(thread = %thread_name, agent = %agent_name, depth, error = %e, "Delegated turn failed");
                    }
                    let note = match &e {
                        AgentError::Cancelled => "Turn cancelled before an answer was produced.".to_string(),
                        other => format!("Turn failed: {}", other),
                    };
                    if let Err(append_err) = self.threads.append(&thread.id, Message::assistant(note)).await {
                        warn!(thread = %thread_name, error = %append_err, "Could not record turn failure");
                    }
                    Err(e)
                }
            }
        }
        .boxed()
    }

    /// ModelGenerating / ToolCallPending / ToolExecuting until a final answer
    async fn run_rounds(
        &self,
        agent: &Agent,
        thread: &Thread,
        ctx: &TurnContext,
        depth: usize,
        trace: &mut Vec<ToolCallResult>,
    ) -> AgentResult<String> {
        let tools: Vec<ToolDefinition> = agent.tools.iter().map(ToolBinding::definition).collect();

        loop {
            ctx.check_cancelled()?;

            let snapshot = self.threads.get_by_id(&thread.id).await?;
            let request = self.build_request(agent, &snapshot, tools.clone());

            ctx.emit(TurnChunk::status(TurnStatus::Generating {
                agent: agent.name.clone(),
            }))
            .await;
            debug!(agent = %agent.name, thread = %thread.name, "Model generating");

            let completion = self.complete(request, ctx, depth).await?;
            if !completion.requests_tools() {
                return Ok(completion.content);
            }

            let round = ctx.rounds.fetch_add(1, Ordering::SeqCst) + 1;
            if round > self.config.max_tool_rounds {
                warn!(agent = %agent.name, round, limit = self.config.max_tool_rounds, "Round limit reached");
                return Err(AgentError::TurnLimitExceeded(self.config.max_tool_rounds));
            }
            debug!(agent = %agent.name, round, calls = completion.tool_calls.len(), "Tool calls pending");

            for call in &completion.tool_calls {
                ctx.check_cancelled()?;

                self.threads
                    .append(&thread.id, Message::tool_call(&call.id, &call.name, &call.arguments))
                    .await?;
                ctx.emit(TurnChunk::status(TurnStatus::CallingTool {
                    tool_name: call.name.clone(),
                }))
                .await;
                ctx.emit(TurnChunk::tool_call(call)).await;

                let (result, fatal) = match self.execute_tool(agent, thread, call, ctx, depth).await {
                    Ok(result) => (result, None),
                    Err(e) => (ToolCallResult::failure(call, e.to_string(), 0), Some(e)),
                };

                self.threads
                    .append(&thread.id, Message::tool_result(&call.id, &call.name, result.content()))
                    .await?;
                ctx.emit(TurnChunk::status(TurnStatus::ToolResultReceived {
                    tool_name: call.name.clone(),
                }))
                .await;
                ctx.emit(TurnChunk::tool_result(&result)).await;
                trace.push(result);

                if let Some(e) = fatal {
                    return Err(e);
                }
            }
        }
    }

    fn build_request(&self, agent: &Agent, thread: &Thread, tools: Vec<ToolDefinition>) -> CompletionRequest {
        let window = self.windows.get(&agent.name).cloned().unwrap_or_default();
        let history = apply_strategy(&thread.messages, &window);

        let mut messages = vec![ChatMessage::system(&agent.instructions)];
        messages.extend(to_chat_messages(&history));

        CompletionRequest {
            agent: agent.id.clone(),
            agent_name: agent.name.clone(),
            thread: thread.remote.clone(),
            messages,
            tools,
            temperature: self.config.temperature,
            max_tokens: None,
        }
    }

    /// One model call; pre-stream failures are retried, mid-stream ones are not
    async fn complete(&self, request: CompletionRequest, ctx: &TurnContext, depth: usize) -> AgentResult<Completion> {
        let host = self.agents.host();

        let mut stream = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            result = with_retry(&self.retry, "complete", || host.complete(request.clone())) => result?,
        };

        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut finish_reason = None;

        loop {
            let next = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                next = stream.next() => next,
            };
            let Some(item) = next else {
                break;
            };
            let chunk = item?;

            if chunk.has_content() {
                content.push_str(&chunk.content);
                if depth == 0 {
                    ctx.emit(TurnChunk::text(&chunk.content)).await;
                }
            }
            for delta in &chunk.tool_calls {
                accumulator.apply_delta(delta);
            }
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
        }

        Ok(Completion {
            content,
            tool_calls: accumulator.build(),
            finish_reason,
        })
    }

    /// Resolve and dispatch one tool call.
    ///
    /// Errors the model can recover from become failed results; only errors
    /// that must end the turn come back as `Err`.
    async fn execute_tool(
        &self,
        agent: &Agent,
        thread: &Thread,
        call: &ToolCall,
        ctx: &TurnContext,
        depth: usize,
    ) -> AgentResult<ToolCallResult> {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let binding = match ToolRegistry::resolve_on(agent, &call.name) {
            Ok(binding) => binding,
            Err(e) => {
                warn!(agent = %agent.name, tool = %call.name, "Model requested an unregistered tool");
                return Ok(ToolCallResult::failure(call, e.to_string(), elapsed()));
            }
        };

        let outcome = match &binding {
            ToolBinding::SubAgentCall { target, .. } => {
                ctx.emit(TurnChunk::status(TurnStatus::Delegating {
                    agent: target.clone(),
                }))
                .await;
                let delegated = match self.threads.child(&thread.name, target).await {
                    Ok(child) => {
                        self.drive(child.name, target.clone(), query_text(call), ctx, depth + 1)
                            .await
                    }
                    Err(e) => Err(e),
                };
                match delegated {
                    Ok(reply) => Ok(Value::String(reply.content)),
                    Err(e) if e.is_fatal_for_parent() => return Err(e),
                    Err(e) => Err(e),
                }
            }
            ToolBinding::ExternalApiCall { spec_ref, auth, .. } => self.call_api(spec_ref, auth, call).await,
            ToolBinding::DocumentSearch { index, .. } => {
                self.search_documents(index.as_ref().or(agent.attached_index.as_ref()), call)
                    .await
            }
            ToolBinding::WebSearch { connection, .. } => self.search_web(connection, call).await,
        };

        Ok(match outcome {
            Ok(output) => ToolCallResult::success(call, output, elapsed()),
            Err(e) => {
                warn!(agent = %agent.name, tool = %call.name, kind = binding.kind(), error = %e, "Tool call failed");
                ToolCallResult::failure(call, e.to_string(), elapsed())
            }
        })
    }

    async fn call_api(&self, spec_ref: &str, auth: &ApiAuthMode, call: &ToolCall) -> AgentResult<Value> {
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| AgentError::ToolExecution("no API invoker is configured".to_string()))?;
        let operation = call
            .str_arg("operation")
            .ok_or_else(|| AgentError::ToolExecution("missing 'operation' argument".to_string()))?;
        let arguments = call.arguments.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let response = api.invoke(spec_ref, auth, operation, &arguments).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(AgentError::ToolExecution(format!(
                "{} returned HTTP {}: {}",
                operation, response.status, response.body
            )))
        }
    }

    async fn search_documents(&self, index: Option<&IndexId>, call: &ToolCall) -> AgentResult<Value> {
        let indexer = self
            .indexer
            .as_ref()
            .ok_or_else(|| AgentError::ToolExecution("document search is not configured".to_string()))?;
        let index =
            index.ok_or_else(|| AgentError::ToolExecution("no document index is attached to this agent".to_string()))?;

        let passages = indexer.search(index, &query_text(call)).await?;
        Ok(serde_json::to_value(passages)?)
    }

    async fn search_web(&self, connection: &str, call: &ToolCall) -> AgentResult<Value> {
        let web = self
            .web
            .as_ref()
            .ok_or_else(|| AgentError::ToolExecution("web search is not configured".to_string()))?;

        let passages = web
            .search(connection, &query_text(call), self.config.search_top_k)
            .await?;
        Ok(serde_json::to_value(passages)?)
    }
}

/// The `query` argument, or the raw arguments when the model sent none
fn query_text(call: &ToolCall) -> String {
    call.str_arg("query")
        .map(str::to_string)
        .unwrap_or_else(|| call.arguments.to_string())
}

/// Replay a thread log in the hosting service's chat format
pub fn to_chat_messages(log: &[Message]) -> Vec<ChatMessage> {
    log.iter()
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(&m.content),
            MessageRole::Assistant => ChatMessage::assistant(&m.content),
            MessageRole::ToolCall => {
                let arguments = serde_json::from_str(&m.content).unwrap_or_else(|_| json!({}));
                ChatMessage::assistant_with_tools(vec![ToolCall::new(
                    m.tool_call_id.clone().unwrap_or_default(),
                    m.tool_name.clone().unwrap_or_default(),
                    arguments,
                )])
            }
            MessageRole::ToolResult => {
                ChatMessage::tool(m.tool_call_id.clone().unwrap_or_default(), &m.content)
            }
        })
        .collect()
}
