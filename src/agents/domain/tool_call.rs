//! Tool bindings and tool call types

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::IndexId;

/// How an external API tool authenticates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiAuthMode {
    /// No credentials
    #[default]
    Anonymous,
    /// Key read from an environment variable, sent in `header`
    ApiKey { header: String, key_env: String },
    /// Credentials come from a named connection
    Connection { connection: String },
}

/// A capability attached to an agent and callable by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolBinding {
    /// Delegate to another agent's own turn
    SubAgentCall {
        name: String,
        description: String,
        /// Name of the delegate agent
        target: String,
    },
    /// Call an API described by an OpenAPI document
    ExternalApiCall {
        name: String,
        description: String,
        /// Path of the OpenAPI document
        spec_ref: String,
        #[serde(default)]
        auth: ApiAuthMode,
    },
    /// Search a document index. Without an explicit index the agent's bound index is used.
    DocumentSearch {
        name: String,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<IndexId>,
    },
    /// Search the web through a named connection
    WebSearch {
        name: String,
        description: String,
        connection: String,
    },
}

impl ToolBinding {
    pub fn sub_agent(name: impl Into<String>, description: impl Into<String>, target: impl Into<String>) -> Self {
        Self::SubAgentCall {
            name: name.into(),
            description: description.into(),
            target: target.into(),
        }
    }

    pub fn external_api(
        name: impl Into<String>,
        description: impl Into<String>,
        spec_ref: impl Into<String>,
        auth: ApiAuthMode,
    ) -> Self {
        Self::ExternalApiCall {
            name: name.into(),
            description: description.into(),
            spec_ref: spec_ref.into(),
            auth,
        }
    }

    pub fn document_search(name: impl Into<String>, index: Option<IndexId>) -> Self {
        Self::DocumentSearch {
            name: name.into(),
            description: "Search the documents uploaded for this agent".to_string(),
            index,
        }
    }

    pub fn web_search(name: impl Into<String>, connection: impl Into<String>) -> Self {
        Self::WebSearch {
            name: name.into(),
            description: "Search the web for current information".to_string(),
            connection: connection.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolBinding::SubAgentCall { name, .. }
            | ToolBinding::ExternalApiCall { name, .. }
            | ToolBinding::DocumentSearch { name, .. }
            | ToolBinding::WebSearch { name, .. } => name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ToolBinding::SubAgentCall { description, .. }
            | ToolBinding::ExternalApiCall { description, .. }
            | ToolBinding::DocumentSearch { description, .. }
            | ToolBinding::WebSearch { description, .. } => description,
        }
    }

    /// Variant label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ToolBinding::SubAgentCall { .. } => "sub_agent_call",
            ToolBinding::ExternalApiCall { .. } => "external_api_call",
            ToolBinding::DocumentSearch { .. } => "document_search",
            ToolBinding::WebSearch { .. } => "web_search",
        }
    }

    /// Function definition advertised to the model
    pub fn definition(&self) -> ToolDefinition {
        let parameters = match self {
            ToolBinding::SubAgentCall { .. } => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The question to delegate"
                    }
                },
                "required": ["query"]
            }),
            ToolBinding::ExternalApiCall { .. } => json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "description": "operationId to invoke"
                    },
                    "arguments": {
                        "type": "object",
                        "description": "Path, query or body parameters by name"
                    }
                },
                "required": ["operation"]
            }),
            ToolBinding::DocumentSearch { .. } | ToolBinding::WebSearch { .. } => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    }
                },
                "required": ["query"]
            }),
        };
        ToolDefinition::new(self.name(), self.description(), parameters)
    }
}

/// A tool call made by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool being called
    pub name: String,
    /// Arguments passed to the tool (as JSON)
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Generate a unique ID for a tool call
    pub fn generate_id() -> String {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        format!("call_{}", &raw[..24])
    }

    /// String argument by key, e.g. `query`
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// Trace entry for one executed tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
    pub output: Value,
    pub execution_time_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn success(call: &ToolCall, output: Value, execution_time_ms: u64) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            input: call.arguments.clone(),
            output,
            execution_time_ms,
            success: true,
            error: None,
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            input: call.arguments.clone(),
            output: Value::Null,
            execution_time_ms,
            success: false,
            error: Some(error.into()),
        }
    }

    /// Content recorded in the ToolResult message and fed back to the model
    pub fn content(&self) -> String {
        if let Some(error) = &self.error {
            return json!({ "error": error }).to_string();
        }
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Definition of a tool advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_serde_shape() {
        let binding = ToolBinding::sub_agent("zoning_advisor", "Zoning questions", "ZoningAdvisorAgent");
        let value = serde_json::to_value(&binding).unwrap();
        assert_eq!(value["kind"], "sub_agent_call");
        assert_eq!(value["target"], "ZoningAdvisorAgent");

        let back: ToolBinding = serde_json::from_value(value).unwrap();
        assert_eq!(back, binding);
    }

    #[test]
    fn test_result_content() {
        let call = ToolCall::new("call_1", "rentcast_api", json!({}));
        let ok = ToolCallResult::success(&call, json!("plain text"), 3);
        assert_eq!(ok.content(), "plain text");

        let failed = ToolCallResult::failure(&call, "HTTP 404", 3);
        assert_eq!(failed.content(), r#"{"error":"HTTP 404"}"#);
    }

    #[test]
    fn test_generate_id_shape() {
        let id = ToolCall::generate_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), 29);
    }
}
