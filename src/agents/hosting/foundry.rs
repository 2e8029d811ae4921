//! Azure AI Foundry style hosting service over HTTP

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    AgentHost, ChatMessage, ChatRole, CompletionRequest, FinishReason, HostStream, HostStreamSender,
    StreamChunk, ToolCallDelta,
};
use crate::agents::domain::{
    Agent, AgentDefinition, AgentId, AgentRole, FileId, IndexId, Passage, ThreadRef, ToolBinding,
};
use crate::agents::error::{RemoteError, RemoteResult};
use crate::agents::indexer::IndexBackend;
use crate::config::HostingSettings;

/// Hosting service client
pub struct FoundryHost {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    inference_endpoint: String,
    deployment: String,
    api_version: String,
    temperature: Option<f32>,
}

impl FoundryHost {
    /// Build a client from hosting settings; the key is read from the environment
    pub fn new(settings: &HostingSettings) -> RemoteResult<Self> {
        let api_key = env::var(&settings.api_key_env).map_err(|_| {
            RemoteError::Authentication(format!("Environment variable {} not set", settings.api_key_env))
        })?;

        let endpoint = settings
            .endpoint
            .clone()
            .ok_or_else(|| RemoteError::InvalidRequest("hosting.endpoint is not set".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let inference_endpoint = settings
            .inference_endpoint
            .as_deref()
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| endpoint.clone());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            endpoint,
            inference_endpoint,
            deployment: settings.deployment.clone(),
            api_version: settings.api_version.clone(),
            temperature: settings.temperature,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}?api-version={}", self.endpoint, path, self.api_version)
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> RemoteResult<Value> {
        let response = request.header("api-key", &self.api_key).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), error_text));
        }
        response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(format!("Failed to parse response: {}", e)))
    }

    fn agent_body(&self, definition: &AgentDefinition) -> RemoteResult<Value> {
        let bindings = serde_json::to_string(&definition.tools)
            .map_err(|e| RemoteError::InvalidRequest(e.to_string()))?;

        let tools: Vec<Value> = definition
            .tools
            .iter()
            .map(|t| {
                let def = t.definition();
                json!({
                    "type": "function",
                    "function": {
                        "name": def.name,
                        "description": def.description,
                        "parameters": def.parameters,
                    }
                })
            })
            .collect();

        let mut metadata = json!({
            "role": definition.role.to_string(),
            "tool_bindings": bindings,
        });
        if let Some(index) = &definition.attached_index {
            metadata["index"] = json!(index.as_str());
        }

        Ok(json!({
            "model": self.deployment,
            "name": definition.name,
            "instructions": definition.instructions,
            "tools": tools,
            "metadata": metadata,
        }))
    }

    fn parse_agent(raw: &RemoteAgent) -> Option<Agent> {
        let name = raw.name.clone()?;
        let metadata = raw.metadata.as_ref();
        let role = match metadata.and_then(|m| m.get("role")).and_then(Value::as_str) {
            Some("primary") => AgentRole::Primary,
            _ => AgentRole::Sub,
        };
        let tools: Vec<ToolBinding> = metadata
            .and_then(|m| m.get("tool_bindings"))
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let attached_index = metadata
            .and_then(|m| m.get("index"))
            .and_then(Value::as_str)
            .map(IndexId::from);

        Some(Agent {
            id: AgentId::new(&raw.id),
            name,
            role,
            instructions: raw.instructions.clone().unwrap_or_default(),
            tools,
            attached_index,
        })
    }

    fn completion_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(convert_message).collect();

        let mut body = json!({
            "messages": messages,
            "stream": true,
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                }))
                .collect::<Vec<_>>());
        }
        if let Some(temp) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn stream_completion(response: reqwest::Response, sender: HostStreamSender) -> RemoteResult<()> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| RemoteError::Streaming(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer = buffer[pos + 1..].to_string();

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }

                let Some(chunk) = parse_stream_data(data) else {
                    continue;
                };
                if sender.send(chunk).await.is_err() {
                    // receiver dropped
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

fn convert_message(m: &ChatMessage) -> Value {
    let mut msg = json!({
        "role": match m.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        },
        "content": m.content,
    });

    if !m.tool_calls.is_empty() {
        msg["tool_calls"] = json!(m
            .tool_calls
            .iter()
            .map(|tc| json!({
                "id": tc.id,
                "type": "function",
                "function": {
                    "name": tc.name,
                    "arguments": tc.arguments.to_string(),
                }
            }))
            .collect::<Vec<_>>());
    }
    if let Some(id) = &m.tool_call_id {
        msg["tool_call_id"] = json!(id);
    }
    msg
}

/// Parse the JSON payload of one `data:` line
fn parse_stream_data(data: &str) -> Option<StreamChunk> {
    let parsed: StreamResponse = serde_json::from_str(data).ok()?;
    let choice = parsed.choices.into_iter().next()?;

    let mut chunk = StreamChunk::text(choice.delta.content.unwrap_or_default());
    for tc in choice.delta.tool_calls.unwrap_or_default() {
        let mut delta = ToolCallDelta::new(tc.index);
        if let Some(id) = tc.id {
            delta = delta.with_id(id);
        }
        if let Some(func) = tc.function {
            if let Some(name) = func.name {
                delta = delta.with_name(name);
            }
            if let Some(args) = func.arguments {
                delta = delta.with_arguments(args);
            }
        }
        chunk.tool_calls.push(delta);
    }
    chunk.finish_reason = choice.finish_reason.as_deref().map(FinishReason::parse);
    Some(chunk)
}

#[async_trait]
impl AgentHost for FoundryHost {
    fn name(&self) -> &str {
        "foundry"
    }

    async fn list_agents(&self) -> RemoteResult<Vec<Agent>> {
        let body = self
            .send_json(self.client.get(format!("{}&limit=100", self.url("assistants"))))
            .await?;
        let list: RemoteList<RemoteAgent> =
            serde_json::from_value(body).map_err(|e| RemoteError::Parse(e.to_string()))?;
        Ok(list.data.iter().filter_map(Self::parse_agent).collect())
    }

    async fn create_agent(&self, definition: &AgentDefinition) -> RemoteResult<AgentId> {
        let body = self.agent_body(definition)?;
        let created = self
            .send_json(self.client.post(self.url("assistants")).json(&body))
            .await?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(AgentId::from)
            .ok_or_else(|| RemoteError::Parse("create agent response has no id".to_string()))
    }

    async fn update_agent(&self, id: &AgentId, definition: &AgentDefinition) -> RemoteResult<()> {
        let body = self.agent_body(definition)?;
        self.send_json(self.client.post(self.url(&format!("assistants/{}", id))).json(&body))
            .await?;
        Ok(())
    }

    async fn create_thread(&self) -> RemoteResult<ThreadRef> {
        let created = self
            .send_json(self.client.post(self.url("threads")).json(&json!({})))
            .await?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(ThreadRef::from)
            .ok_or_else(|| RemoteError::Parse("create thread response has no id".to_string()))
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("threads/{}", thread)))
            .header("api-key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), error_text))
    }

    async fn complete(&self, request: CompletionRequest) -> RemoteResult<HostStream> {
        let body = self.completion_body(&request);
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.inference_endpoint, self.deployment, self.api_version
        );

        debug!(agent = %request.agent_name, messages = request.messages.len(), tools = request.tools.len(), "Requesting completion");

        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), error_text));
        }

        let (sender, stream) = HostStream::channel(64);
        tokio::spawn(async move {
            if let Err(e) = Self::stream_completion(response, sender.clone()).await {
                warn!(error = %e, "Completion stream failed");
                let _ = sender.send_error(e).await;
            }
        });

        Ok(stream)
    }
}

#[async_trait]
impl IndexBackend for FoundryHost {
    async fn upload_file(&self, bytes: Vec<u8>, file_name: &str) -> RemoteResult<FileId> {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime.as_ref())
            .map_err(|e| RemoteError::InvalidRequest(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);

        let created = self
            .send_json(self.client.post(self.url("files")).multipart(form))
            .await?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(FileId::from)
            .ok_or_else(|| RemoteError::Parse("upload response has no id".to_string()))
    }

    async fn create_index(&self, name: &str, files: &[FileId]) -> RemoteResult<IndexId> {
        let body = json!({
            "name": name,
            "file_ids": files.iter().map(FileId::as_str).collect::<Vec<_>>(),
        });
        let created = self
            .send_json(self.client.post(self.url("vector_stores")).json(&body))
            .await?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(IndexId::from)
            .ok_or_else(|| RemoteError::Parse("create index response has no id".to_string()))
    }

    async fn search(&self, index: &IndexId, query: &str, top_k: usize) -> RemoteResult<Vec<Passage>> {
        let body = json!({ "query": query, "max_num_results": top_k });
        let found = self
            .send_json(
                self.client
                    .post(self.url(&format!("vector_stores/{}/search", index)))
                    .json(&body),
            )
            .await?;
        let list: RemoteList<SearchHit> =
            serde_json::from_value(found).map_err(|e| RemoteError::Parse(e.to_string()))?;

        Ok(list
            .data
            .into_iter()
            .map(|hit| {
                let text = hit
                    .content
                    .into_iter()
                    .filter_map(|c| c.text)
                    .collect::<Vec<_>>()
                    .join("\n");
                let mut passage = Passage::new(text);
                if let Some(file) = hit.filename {
                    passage = passage.with_source(file);
                }
                if let Some(score) = hit.score {
                    passage = passage.with_score(score);
                }
                passage
            })
            .collect())
    }

    async fn delete_index(&self, index: &IndexId) -> RemoteResult<()> {
        self.send_json(
            self.client
                .delete(self.url(&format!("vector_stores/{}", index))),
        )
        .await?;
        Ok(())
    }
}

// Hosting service response types

#[derive(Debug, Deserialize)]
struct RemoteList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RemoteAgent {
    id: String,
    name: Option<String>,
    instructions: Option<String>,
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    filename: Option<String>,
    score: Option<f32>,
    #[serde(default)]
    content: Vec<SearchContent>,
}

#[derive(Debug, Deserialize)]
struct SearchContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::domain::ToolCall;

    #[test]
    fn test_parse_text_delta() {
        let chunk = parse_stream_data(r#"{"choices":[{"delta":{"content":"Cap rate"},"finish_reason":null}]}"#).unwrap();
        assert_eq!(chunk.content, "Cap rate");
        assert!(chunk.finish_reason.is_none());
    }

    #[test]
    fn test_parse_tool_call_delta() {
        let chunk = parse_stream_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"zoning_advisor","arguments":"{\"q"}}]},"finish_reason":"tool_calls"}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].name.as_deref(), Some("zoning_advisor"));
        assert_eq!(chunk.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn test_parse_agent_metadata() {
        let bindings = vec![ToolBinding::web_search("web_search", "bing")];
        let raw = RemoteAgent {
            id: "asst_9".into(),
            name: Some("ZoningAdvisorAgent".into()),
            instructions: Some("Role: zoning".into()),
            metadata: Some(json!({
                "role": "sub",
                "tool_bindings": serde_json::to_string(&bindings).unwrap(),
                "index": "vs_1",
            })),
        };
        let agent = FoundryHost::parse_agent(&raw).unwrap();
        assert_eq!(agent.id.as_str(), "asst_9");
        assert_eq!(agent.tools, bindings);
        assert_eq!(agent.attached_index, Some(IndexId::new("vs_1")));
    }

    #[test]
    fn test_convert_assistant_tool_message() {
        let call = ToolCall::new("call_1", "valuation_expert", json!({"query": "rent"}));
        let msg = convert_message(&ChatMessage::assistant_with_tools(vec![call]));
        assert_eq!(msg["role"], "assistant");
        assert_eq!(msg["tool_calls"][0]["function"]["arguments"], r#"{"query":"rent"}"#);
    }
}
