//! Remote agent-hosting capability
//!
//! The hosting service owns agent records and the remote conversation
//! context behind each thread, and runs model completions:
//! - `FoundryHost` talks to an Azure AI Foundry style HTTP service
//! - `InMemoryHost` keeps everything in process (offline mode and tests)

mod foundry;
mod memory;
pub mod retry;
mod stream;

pub use foundry::FoundryHost;
pub use memory::{InMemoryHost, ScriptedReply};
pub use retry::{with_retry, RetryPolicy};
pub use stream::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::domain::{Agent, AgentDefinition, AgentId, ThreadRef, ToolCall, ToolDefinition};
use crate::agents::error::RemoteResult;

/// Trait for agent-hosting backends
#[async_trait]
pub trait AgentHost: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// All agent records held remotely
    async fn list_agents(&self) -> RemoteResult<Vec<Agent>>;

    async fn create_agent(&self, definition: &AgentDefinition) -> RemoteResult<AgentId>;

    async fn update_agent(&self, id: &AgentId, definition: &AgentDefinition) -> RemoteResult<()>;

    /// Create when `existing` is None, update in place otherwise
    async fn create_or_update_agent(
        &self,
        existing: Option<&AgentId>,
        definition: &AgentDefinition,
    ) -> RemoteResult<AgentId> {
        match existing {
            Some(id) => {
                self.update_agent(id, definition).await?;
                Ok(id.clone())
            }
            None => self.create_agent(definition).await,
        }
    }

    /// Open a remote conversation context
    async fn create_thread(&self) -> RemoteResult<ThreadRef>;

    async fn delete_thread(&self, thread: &ThreadRef) -> RemoteResult<()>;

    /// Run one model completion.
    ///
    /// Errors raised before the stream starts (connection, status) come back
    /// directly so callers can retry them; later failures arrive in the stream.
    async fn complete(&self, request: CompletionRequest) -> RemoteResult<HostStream>;
}

/// Role of a message sent to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of a completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::Assistant, content)
    }

    pub fn assistant_with_tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(ChatRole::Assistant, String::new())
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(ChatRole::Tool, content)
        }
    }
}

/// Request for one model completion on behalf of an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub agent: AgentId,
    /// Agent name, used by backends that key behaviour by name
    pub agent_name: String,
    /// Remote conversation context of the thread being served
    pub thread: ThreadRef,
    /// System instructions followed by the windowed history
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Text of the latest user or tool message
    pub fn last_input(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, ChatRole::User | ChatRole::Tool))
            .map(|m| m.content.as_str())
    }
}
