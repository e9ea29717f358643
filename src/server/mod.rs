//! 대시보드 API 서버
//!
//! Assistant를 HTTP로 노출하는 어댑터입니다.
//!
//! - `GET    /health`
//! - `GET    /api/documents`
//! - `POST   /api/documents`  `{name, content_base64, force?}`
//! - `DELETE /api/documents`  `{source}`
//! - `GET    /api/search?q=&limit=`
//! - `POST   /api/chat`       `{query}` → SSE (`context`, `token`..., `done`)

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::assistant::{Assistant, IngestReport};
use crate::error::RagError;
use crate::knowledge::ScoredChunk;
use crate::retrieval::RetrievedChunk;

/// 업로드 최대 크기 (base64 인코딩 포함)
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match err.downcast_ref::<RagError>() {
            Some(RagError::UnsupportedFileType(_)) | Some(RagError::FileNotFound(_)) => {
                ApiError::BadRequest(message)
            }
            Some(RagError::Unsupported { .. }) => ApiError::NotImplemented(message),
            _ => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            ApiError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

pub struct AppState {
    pub assistant: Arc<Assistant>,
}

pub fn router(assistant: Arc<Assistant>) -> Router {
    let state = Arc::new(AppState { assistant });

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/documents",
            get(list_documents)
                .post(upload_document)
                .delete(delete_document),
        )
        .route("/api/search", get(search))
        .route("/api/chat", axum::routing::post(chat))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 서버 실행 (종료 시까지 블록)
pub async fn serve(assistant: Arc<Assistant>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Dashboard API listening on {}", listener.local_addr()?);

    axum::serve(listener, router(assistant))
        .await
        .context("Server error")
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_documents(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let sources = state.assistant.list_sources().await?;
    Ok(Json(json!({ "documents": sources })))
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    name: String,
    content_base64: String,
    #[serde(default)]
    force: bool,
}

async fn upload_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<IngestReport>, ApiError> {
    let bytes = BASE64
        .decode(req.content_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 content: {}", e)))?;

    let report = state
        .assistant
        .ingest_bytes(&req.name, bytes, req.force)
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    source: String,
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.assistant.forget(&req.source).await?;
    Ok(Json(json!({ "source": req.source, "removed": removed })))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
    limit: Option<usize>,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    if params.q.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let limit = params
        .limit
        .unwrap_or(state.assistant.config().retrieval.top_k);
    let results: Vec<ScoredChunk> = state.assistant.search(&params.q, limit).await?;
    Ok(Json(json!({ "results": results })))
}

// ============================================================================
// Chat (SSE)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
}

/// 채팅 스트림 이벤트
#[derive(Debug, Clone, PartialEq)]
enum ChatEvent {
    Context(Vec<RetrievedChunk>),
    Token(String),
    Error(String),
    Done,
}

impl ChatEvent {
    fn into_event(self) -> Event {
        match self {
            ChatEvent::Context(chunks) => {
                let data = serde_json::to_string(&chunks).unwrap_or_else(|_| "[]".to_string());
                Event::default().event("context").data(data)
            }
            // SSE 데이터에는 CR을 실을 수 없음
            ChatEvent::Token(text) => Event::default().event("token").data(text.replace('\r', "")),
            ChatEvent::Error(message) => {
                Event::default().event("error").data(message.replace('\r', ""))
            }
            ChatEvent::Done => Event::default().event("done").data(""),
        }
    }
}

/// 컨텍스트 검색 후 응답 조각을 이벤트 스트림으로 변환
async fn chat_events(
    assistant: &Assistant,
    query: &str,
) -> Result<BoxStream<'static, ChatEvent>> {
    let context = assistant.recall(query).await?;
    let rx = assistant.responder().stream(query, &context).await?;

    let tokens = stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Ok(fragment)) => Some((ChatEvent::Token(fragment), Some(rx))),
            Some(Err(e)) => Some((ChatEvent::Error(format!("{:#}", e)), None)),
            None => Some((ChatEvent::Done, None)),
        }
    });

    Ok(stream::once(async move { ChatEvent::Context(context) })
        .chain(tokens)
        .boxed())
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let events = chat_events(&state.assistant, &req.query).await?;
    Ok(Sse::new(events.map(|e| Ok(e.into_event()))).keep_alive(KeepAlive::default()))
}

// ============================================================================
// Tests
// ============================================================================
