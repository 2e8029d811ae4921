//! Message and thread types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ThreadId, ThreadRef};

/// Role of a logged message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    /// A tool invocation requested by the model
    ToolCall,
    /// The outcome of a tool invocation
    ToolResult,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::ToolCall => write!(f, "Tool call"),
            MessageRole::ToolResult => write!(f, "Tool result"),
        }
    }
}

/// A message in a thread log. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// Tool involved, for tool-call and tool-result messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Links a tool result to the call that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn build(role: MessageRole, content: String, tool_name: Option<String>, tool_call_id: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_name,
            tool_call_id,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::build(MessageRole::User, content.into(), None, None)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::build(MessageRole::Assistant, content.into(), None, None)
    }

    /// A tool call; the content holds the JSON arguments
    pub fn tool_call(id: impl Into<String>, tool_name: impl Into<String>, arguments: &Value) -> Self {
        Self::build(
            MessageRole::ToolCall,
            arguments.to_string(),
            Some(tool_name.into()),
            Some(id.into()),
        )
    }

    pub fn tool_result(id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::build(
            MessageRole::ToolResult,
            content.into(),
            Some(tool_name.into()),
            Some(id.into()),
        )
    }

    /// Plain-text rendering used by `history`
    pub fn render_line(&self) -> String {
        match &self.tool_name {
            Some(tool) => format!("{} ({}): {}", self.role, tool, self.content.trim()),
            None => format!("{}: {}", self.role, self.content.trim()),
        }
    }
}

/// An ordered, append-only conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    /// Caller-chosen unique name
    pub name: String,
    /// Conversation context held by the hosting service
    pub remote: ThreadRef,
    /// Set on child threads created for delegated turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ThreadId>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Thread {
    pub fn new(name: impl Into<String>, remote: ThreadRef) -> Self {
        Self {
            id: ThreadId::generate(),
            name: name.into(),
            remote,
            parent: None,
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn child_of(mut self, parent: &ThreadId) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Get a preview of the last message
    pub fn last_message_preview(&self, max_len: usize) -> Option<String> {
        self.messages.last().map(|m| {
            if m.content.chars().count() > max_len {
                let cut: String = m.content.chars().take(max_len).collect();
                format!("{}...", cut)
            } else {
                m.content.clone()
            }
        })
    }

    pub fn to_summary(&self) -> ThreadSummary {
        ThreadSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            last_message_preview: self.last_message_preview(100),
        }
    }

    /// Render the log as "Role: text" lines
    pub fn history_lines(&self) -> Vec<String> {
        self.messages.iter().map(Message::render_line).collect()
    }
}

/// Summary of a thread for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub name: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_lines() {
        let mut thread = Thread::new("deal-123", ThreadRef::new("thread_abc"));
        thread.messages.push(Message::user("What is the zoning?"));
        thread.messages.push(Message::tool_call("call_1", "zoning_advisor", &json!({"query": "zoning"})));
        thread.messages.push(Message::tool_result("call_1", "zoning_advisor", "R-2"));
        thread.messages.push(Message::assistant("It is zoned R-2."));

        let lines = thread.history_lines();
        assert_eq!(lines[0], "User: What is the zoning?");
        assert_eq!(lines[1], r#"Tool call (zoning_advisor): {"query":"zoning"}"#);
        assert_eq!(lines[2], "Tool result (zoning_advisor): R-2");
        assert_eq!(lines[3], "Assistant: It is zoned R-2.");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let mut thread = Thread::new("t", ThreadRef::new("r"));
        thread.messages.push(Message::assistant("ééééé"));
        assert_eq!(thread.last_message_preview(2).as_deref(), Some("éé..."));
    }
}
