//! OpenAPI-described external API tool

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::agents::domain::ApiAuthMode;
use crate::agents::error::{AgentError, AgentResult, RemoteError};
use crate::config::ConnectionConfig;

const METHODS: [&str; 5] = ["get", "post", "put", "patch", "delete"];

/// One callable operation from an API document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiOperation {
    pub operation_id: String,
    /// Upper-case HTTP method
    pub method: String,
    pub path: String,
    pub path_params: Vec<String>,
    pub query_params: Vec<String>,
    pub description: String,
}

/// The parts of an OpenAPI document needed to call it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSpec {
    pub title: String,
    pub base_url: String,
    pub operations: Vec<ApiOperation>,
}

/// A request ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiSpec {
    /// Parse a JSON or YAML OpenAPI document
    pub fn parse(text: &str) -> AgentResult<Self> {
        let doc: Value = match serde_json::from_str(text) {
            Ok(doc) => doc,
            Err(_) => serde_yaml::from_str(text)
                .map_err(|e| AgentError::Configuration(format!("invalid API document: {}", e)))?,
        };

        let base_url = doc
            .pointer("/servers/0/url")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Configuration("API document has no servers[0].url".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let title = doc
            .pointer("/info/title")
            .and_then(Value::as_str)
            .unwrap_or("API")
            .to_string();

        let mut operations = Vec::new();
        if let Some(paths) = doc.get("paths").and_then(Value::as_object) {
            for (path, item) in paths {
                let shared = item.get("parameters");
                for method in METHODS {
                    if let Some(op) = item.get(method) {
                        operations.push(Self::parse_operation(path, method, op, shared));
                    }
                }
            }
        }

        if operations.is_empty() {
            return Err(AgentError::Configuration(format!("API document '{}' defines no operations", title)));
        }

        Ok(Self {
            title,
            base_url,
            operations,
        })
    }

    pub async fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            AgentError::Configuration(format!("cannot read API document {}: {}", path.as_ref().display(), e))
        })?;
        Self::parse(&text)
    }

    fn parse_operation(path: &str, method: &str, op: &Value, shared: Option<&Value>) -> ApiOperation {
        let mut path_params = Vec::new();
        let mut query_params = Vec::new();

        let params = shared
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .chain(op.get("parameters").and_then(Value::as_array).into_iter().flatten());
        for param in params {
            let Some(name) = param.get("name").and_then(Value::as_str) else {
                continue;
            };
            match param.get("in").and_then(Value::as_str) {
                Some("path") => path_params.push(name.to_string()),
                Some("query") => query_params.push(name.to_string()),
                _ => {}
            }
        }

        let operation_id = op
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let slug: String = path
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect();
                format!("{}{}", method, slug.trim_end_matches('_'))
            });

        let description = op
            .get("summary")
            .or_else(|| op.get("description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        ApiOperation {
            operation_id,
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            path_params,
            query_params,
            description,
        }
    }

    pub fn operation(&self, operation_id: &str) -> Option<&ApiOperation> {
        self.operations.iter().find(|o| o.operation_id == operation_id)
    }

    /// One line per operation, appended to the tool description
    pub fn summary(&self) -> String {
        self.operations
            .iter()
            .map(|op| {
                let mut params: Vec<&str> = op.path_params.iter().map(String::as_str).collect();
                params.extend(op.query_params.iter().map(String::as_str));
                format!("- {}({}): {}", op.operation_id, params.join(", "), op.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Build the request for `operation` from model-supplied arguments.
    ///
    /// Path parameters are substituted; the rest go to the query string for
    /// GET/DELETE and to a JSON body otherwise.
    pub fn prepare(&self, operation_id: &str, arguments: &Value, base_url: Option<&str>) -> AgentResult<PreparedRequest> {
        let op = self.operation(operation_id).ok_or_else(|| {
            AgentError::ToolExecution(format!("'{}' has no operation '{}'", self.title, operation_id))
        })?;

        let mut remaining: Map<String, Value> = arguments.as_object().cloned().unwrap_or_default();

        let mut path = op.path.clone();
        for name in &op.path_params {
            let value = remaining
                .remove(name)
                .ok_or_else(|| AgentError::ToolExecution(format!("missing path parameter '{}'", name)))?;
            path = path.replace(&format!("{{{}}}", name), &scalar(&value));
        }

        let base = base_url.unwrap_or(&self.base_url).trim_end_matches('/');
        let url = format!("{}{}", base, path);

        let (query, body) = if matches!(op.method.as_str(), "GET" | "DELETE") {
            let query = remaining.iter().map(|(k, v)| (k.clone(), scalar(v))).collect();
            (query, None)
        } else if remaining.is_empty() {
            (Vec::new(), None)
        } else {
            (Vec::new(), Some(Value::Object(remaining)))
        };

        Ok(PreparedRequest {
            method: op.method.clone(),
            url,
            query,
            body,
        })
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outcome of an API call, success or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Port for calling API tools
#[async_trait]
pub trait ApiPort: Send + Sync {
    /// Call `operation` of the API described at `spec_ref`
    async fn invoke(
        &self,
        spec_ref: &str,
        auth: &ApiAuthMode,
        operation: &str,
        arguments: &Value,
    ) -> AgentResult<ApiResponse>;
}

/// HTTP invoker with a per-document cache
pub struct HttpApiInvoker {
    client: reqwest::Client,
    specs: RwLock<HashMap<String, Arc<ApiSpec>>>,
    connections: HashMap<String, ConnectionConfig>,
}

impl HttpApiInvoker {
    pub fn new(client: reqwest::Client, connections: &[ConnectionConfig]) -> Self {
        Self {
            client,
            specs: RwLock::new(HashMap::new()),
            connections: connections.iter().map(|c| (c.name.clone(), c.clone())).collect(),
        }
    }

    async fn spec(&self, spec_ref: &str) -> AgentResult<Arc<ApiSpec>> {
        if let Some(spec) = self.specs.read().await.get(spec_ref) {
            return Ok(spec.clone());
        }
        let spec = Arc::new(ApiSpec::load(spec_ref).await?);
        self.specs.write().await.insert(spec_ref.to_string(), spec.clone());
        Ok(spec)
    }

    /// Base URL override and credential header for the auth mode
    fn credentials(&self, auth: &ApiAuthMode) -> AgentResult<(Option<String>, Option<(String, String)>)> {
        match auth {
            ApiAuthMode::Anonymous => Ok((None, None)),
            ApiAuthMode::ApiKey { header, key_env } => {
                let key = std::env::var(key_env)
                    .map_err(|_| AgentError::Configuration(format!("environment variable {} not set", key_env)))?;
                Ok((None, Some((header.clone(), key))))
            }
            ApiAuthMode::Connection { connection } => {
                let conn = self
                    .connections
                    .get(connection)
                    .ok_or_else(|| AgentError::NotFound(format!("connection '{}'", connection)))?;
                Ok((conn.endpoint.clone(), conn.credential()))
            }
        }
    }
}

#[async_trait]
impl ApiPort for HttpApiInvoker {
    async fn invoke(
        &self,
        spec_ref: &str,
        auth: &ApiAuthMode,
        operation: &str,
        arguments: &Value,
    ) -> AgentResult<ApiResponse> {
        let spec = self.spec(spec_ref).await?;
        let (base_url, credential) = self.credentials(auth)?;
        let prepared = spec.prepare(operation, arguments, base_url.as_deref())?;

        debug!(operation, method = %prepared.method, url = %prepared.url, "Calling API tool");

        let method = reqwest::Method::from_bytes(prepared.method.as_bytes())
            .map_err(|e| AgentError::ToolExecution(e.to_string()))?;
        let mut request = self.client.request(method, &prepared.url).query(&prepared.query);
        if let Some((header, value)) = credential {
            request = request.header(header, value);
        }
        if let Some(body) = &prepared.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(RemoteError::from)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(RemoteError::from)?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ApiResponse { status, body })
    }
}
