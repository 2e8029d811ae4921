//! REST layer over [`ChatService`]
//!
//! Threads are addressed by name. Every response uses the same
//! `{success, data, error}` envelope.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agents::{AgentError, ChatService};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl ApiResponse<()> {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

/// HTTP status for a runtime error
pub fn status_for(error: &AgentError) -> StatusCode {
    match error {
        AgentError::NotFound(_) => StatusCode::NOT_FOUND,
        AgentError::DuplicateName(_) | AgentError::DuplicateTool { .. } | AgentError::IndexAlreadyBound { .. } => {
            StatusCode::CONFLICT
        }
        AgentError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        AgentError::TurnLimitExceeded(_) | AgentError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AgentError::Remote(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        }
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

#[derive(Clone)]
pub struct AppState {
    service: Arc<ChatService>,
    started: Instant,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub primary_agent: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    /// Generated as `thread-N` when absent
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct DocumentQuery {
    pub file_name: String,
    /// Release the current index first
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Deleted {
    pub deleted: usize,
}

/// Build the router
pub fn create_app(service: Arc<ChatService>) -> Router {
    let state = AppState {
        service,
        started: Instant::now(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/agents", get(list_agents))
        .route("/threads", get(list_threads).post(create_thread).delete(delete_all_threads))
        .route("/threads/:name", axum::routing::delete(delete_thread))
        .route("/threads/:name/history", get(thread_history))
        .route("/threads/:name/messages", post(send_message))
        .route("/documents", post(upload_document))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the process is stopped
pub async fn serve(service: Arc<ChatService>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_app(service);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        primary_agent: state.service.primary_agent().to_string(),
    };
    (StatusCode::OK, Json(ApiResponse::success(status)))
}

async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(state.service.agents().await)))
}

async fn list_threads(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(state.service.list_threads().await)))
}

async fn create_thread(
    State(state): State<AppState>,
    body: Option<Json<CreateThreadRequest>>,
) -> ApiResult<crate::agents::ThreadSummary> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let thread = match request.name {
        Some(name) => state.service.create_thread(&name).await?,
        None => state.service.new_thread().await?,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(thread.to_summary()))))
}

async fn delete_all_threads(State(state): State<AppState>) -> ApiResult<Deleted> {
    let deleted = state.service.delete_all().await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(Deleted { deleted }))))
}

async fn delete_thread(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<()> {
    state.service.delete_thread(&name).await?;
    Ok((StatusCode::OK, Json(ApiResponse::ok())))
}

async fn thread_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Vec<crate::agents::Message>> {
    let messages = state.service.history(&name).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(messages))))
}

async fn send_message(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<crate::agents::AssistantReply> {
    let reply = state.service.send_message(&name, &request.text).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(reply))))
}

async fn upload_document(
    State(state): State<AppState>,
    Query(query): Query<DocumentQuery>,
    body: Bytes,
) -> ApiResult<Vec<crate::agents::DocumentHandle>> {
    let handles = if query.replace {
        state
            .service
            .replace_documents(vec![(body.to_vec(), query.file_name)])
            .await?
    } else {
        vec![state.service.upload(body.to_vec(), &query.file_name).await?]
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(handles))))
}
