//! Error types for the agent runtime

use thiserror::Error;

/// Errors raised by the delegation runtime
#[derive(Debug, Error)]
pub enum AgentError {
    /// Unknown agent, thread, index or document
    #[error("Not found: {0}")]
    NotFound(String),

    /// A thread or agent name is already taken
    #[error("Name already in use: {0}")]
    DuplicateName(String),

    /// A tool with the same name is already attached to the agent
    #[error("Agent '{agent}' already has a tool named '{tool}'")]
    DuplicateTool { agent: String, tool: String },

    /// The agent (or the index) already has a binding
    #[error("Index '{index}' cannot be bound to agent '{agent}': an index is already bound")]
    IndexAlreadyBound { agent: String, index: String },

    /// The model requested a tool that is not registered on the agent
    #[error("Agent '{agent}' has no tool named '{tool}'")]
    UnknownTool { agent: String, tool: String },

    /// Upload rejected before indexing
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// Hosting service or network failure
    #[error("Remote service error: {0}")]
    Remote(#[from] RemoteError),

    /// Cycle guard tripped
    #[error("Turn exceeded the limit of {0} tool-call rounds")]
    TurnLimitExceeded(u32),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Cancelled
    #[error("Turn was cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether a failure inside a delegated turn must also end the parent turn
    pub fn is_fatal_for_parent(&self) -> bool {
        matches!(self, AgentError::TurnLimitExceeded(_) | AgentError::Cancelled)
    }
}

/// Errors from the remote agent-hosting service
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Non-success HTTP status
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Timeout
    #[error("Request timed out")]
    Timeout,
}

impl RemoteError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Api { status, .. } => *status >= 500 || *status == 408,
            RemoteError::RateLimited { .. } | RemoteError::Network(_) | RemoteError::Timeout => true,
            _ => false,
        }
    }

    /// Map a non-success HTTP response onto the taxonomy
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => RemoteError::Authentication(message),
            429 => RemoteError::RateLimited { retry_after_ms: 1000 },
            _ => RemoteError::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() {
            RemoteError::Network(format!("Connection error: {}", err))
        } else if err.is_decode() {
            RemoteError::Parse(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Internal(format!("IO error: {}", err))
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type alias for hosting-service operations
pub type RemoteResult<T> = Result<T, RemoteError>;
