//! Streaming types for model completions

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::agents::domain::ToolCall;
use crate::agents::error::RemoteError;

/// Reason a completion stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

/// A chunk of streamed model output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Delta content (text being generated)
    #[serde(default)]
    pub content: String,
    /// Tool calls being made (partial or complete)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
    /// Finish reason (if this is the final chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Default::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}

/// Delta update for a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Index of the tool call being updated
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Arguments JSON fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, args: impl Into<String>) -> Self {
        self.arguments = Some(args.into());
        self
    }

    /// Full delta for an already-assembled call
    pub fn complete(index: usize, call: &ToolCall) -> Self {
        Self::new(index)
            .with_id(&call.id)
            .with_name(&call.name)
            .with_arguments(call.arguments.to_string())
    }
}

/// Accumulator for building tool calls from streaming deltas
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    /// Keyed by the stream's call index so a sparse index costs one entry
    tool_calls: BTreeMap<usize, ToolCallBuilder>,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_delta(&mut self, delta: &ToolCallDelta) {
        let builder = self.tool_calls.entry(delta.index).or_default();

        if let Some(id) = &delta.id {
            builder.id.push_str(id);
        }
        if let Some(name) = &delta.name {
            builder.name.push_str(name);
        }
        if let Some(args) = &delta.arguments {
            builder.arguments.push_str(args);
        }
    }

    /// Build the final tool calls, in the order the model requested them
    pub fn build(self) -> Vec<ToolCall> {
        self.tool_calls
            .into_values()
            .filter(|b| !b.id.is_empty() && !b.name.is_empty())
            .map(|b| ToolCall {
                id: b.id,
                name: b.name,
                arguments: serde_json::from_str(&b.arguments).unwrap_or(Value::Object(Default::default())),
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A fully assembled model response
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Streaming response from the hosting service
pub struct HostStream {
    receiver: mpsc::Receiver<Result<StreamChunk, RemoteError>>,
}

impl HostStream {
    /// Create a channel pair for building a host stream
    pub fn channel(buffer: usize) -> (HostStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (HostStreamSender { sender: tx }, Self { receiver: rx })
    }

    /// Collect all chunks into a complete response
    pub async fn collect(mut self) -> Result<Completion, RemoteError> {
        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut finish_reason = None;

        while let Some(result) = self.receiver.recv().await {
            let chunk = result?;
            content.push_str(&chunk.content);
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
}

impl Stream for HostStream {
    type Item = Result<StreamChunk, RemoteError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Sender half for building a host stream
#[derive(Clone)]
pub struct HostStreamSender {
    sender: mpsc::Sender<Result<StreamChunk, RemoteError>>,
}

impl HostStreamSender {
    pub async fn send(&self, chunk: StreamChunk) -> Result<(), mpsc::error::SendError<Result<StreamChunk, RemoteError>>> {
        self.sender.send(Ok(chunk)).await
    }

    pub async fn send_error(&self, error: RemoteError) -> Result<(), mpsc::error::SendError<Result<StreamChunk, RemoteError>>> {
        self.sender.send(Err(error)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accumulator_joins_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply_delta(&ToolCallDelta::new(0).with_id("call_1").with_name("zoning_"));
        acc.apply_delta(&ToolCallDelta::new(0).with_name("advisor").with_arguments(r#"{"query":"#));
        acc.apply_delta(&ToolCallDelta::new(1).with_id("call_2").with_name("web_search"));
        acc.apply_delta(&ToolCallDelta::new(0).with_arguments(r#""R-2?"}"#));

        let calls = acc.build();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "zoning_advisor");
        assert_eq!(calls[0].arguments, json!({"query": "R-2?"}));
        assert_eq!(calls[1].arguments, json!({}));
    }

    #[test]
    fn test_accumulator_sparse_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply_delta(&ToolCallDelta::new(1_000_000_000).with_id("call_9").with_name("web_search"));
        acc.apply_delta(&ToolCallDelta::new(3).with_id("call_3").with_name("zoning_advisor"));

        let calls = acc.build();
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["zoning_advisor", "web_search"]);
    }

    #[tokio::test]
    async fn test_collect() {
        let (tx, stream) = HostStream::channel(8);
        tokio::spawn(async move {
            tx.send(StreamChunk::text("Hello ")).await.ok();
            tx.send(StreamChunk::text("world")).await.ok();
            tx.send(StreamChunk::finish(FinishReason::Stop)).await.ok();
        });
        let completion = stream.collect().await.unwrap();
        assert_eq!(completion.content, "Hello world");
        assert!(!completion.requests_tools());
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
    }
}
