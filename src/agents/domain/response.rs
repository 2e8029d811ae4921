//! Turn results and streaming types

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ToolCall, ToolCallResult};
use crate::agents::error::AgentError;

/// Final result of one completed turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantReply {
    /// Thread name the turn ran on
    pub thread: String,
    /// Agent that produced the answer
    pub agent: String,
    /// Final assembled answer text
    pub content: String,
    /// Tool calls made during the turn, nested delegations excluded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<ToolCallResult>,
    /// Tool-call rounds consumed, nested delegations included
    #[serde(default)]
    pub rounds: u32,
    pub execution_time_ms: u64,
}

/// Router state reported while a turn runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnStatus {
    Starting,
    /// Waiting on the model
    Generating { agent: String },
    CallingTool { tool_name: String },
    /// A sub-agent turn started
    Delegating { agent: String },
    ToolResultReceived { tool_name: String },
    Completed,
    Failed { error: String },
}

/// A chunk of streaming output from a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnChunk {
    /// Partial answer text
    Text { content: String },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        result: Value,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Status { status: TurnStatus },
    Complete { reply: AssistantReply },
    Error { message: String },
}

impl TurnChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn tool_call(tool_call: &ToolCall) -> Self {
        Self::ToolCall {
            id: tool_call.id.clone(),
            name: tool_call.name.clone(),
            arguments: tool_call.arguments.clone(),
        }
    }

    pub fn tool_result(result: &ToolCallResult) -> Self {
        Self::ToolResult {
            tool_call_id: result.tool_call_id.clone(),
            name: result.tool_name.clone(),
            result: result.output.clone(),
            success: result.success,
            error: result.error.clone(),
        }
    }

    pub fn status(status: TurnStatus) -> Self {
        Self::Status { status }
    }

    pub fn complete(reply: AssistantReply) -> Self {
        Self::Complete { reply }
    }
}

type TurnItem = Result<TurnChunk, AgentError>;

/// Streaming view of one turn.
///
/// Dropping the stream cancels the turn at its next suspension point.
pub struct TurnStream {
    receiver: mpsc::Receiver<TurnItem>,
    cancel: CancellationToken,
}

impl TurnStream {
    /// Create a channel pair for building a turn stream
    pub fn channel(buffer: usize) -> (TurnStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        let cancel = CancellationToken::new();
        (
            TurnStreamSender {
                sender: tx,
                cancel: cancel.clone(),
            },
            Self { receiver: rx, cancel },
        )
    }

    /// Request cancellation of the running turn
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the turn to finish and return its reply
    pub async fn collect(mut self) -> Result<AssistantReply, AgentError> {
        let mut reply = None;
        while let Some(item) = self.receiver.recv().await {
            match item? {
                TurnChunk::Complete { reply: r } => reply = Some(r),
                TurnChunk::Error { message } => return Err(AgentError::Internal(message)),
                _ => {}
            }
        }
        reply.ok_or_else(|| AgentError::Internal("turn ended without a reply".to_string()))
    }
}

impl Stream for TurnStream {
    type Item = TurnItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Sender half for building a turn stream
#[derive(Clone)]
pub struct TurnStreamSender {
    sender: mpsc::Sender<TurnItem>,
    cancel: CancellationToken,
}

impl TurnStreamSender {
    /// Send a chunk
    pub async fn send(&self, chunk: TurnChunk) -> Result<(), mpsc::error::SendError<TurnItem>> {
        self.sender.send(Ok(chunk)).await
    }

    /// Send an error
    pub async fn send_error(&self, error: AgentError) -> Result<(), mpsc::error::SendError<TurnItem>> {
        self.sender.send(Err(error)).await
    }

    /// Token cancelled when the consumer cancels or goes away
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
