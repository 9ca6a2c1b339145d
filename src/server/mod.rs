//! HTTP surface
//!
//! REST endpoints for conversations plus the SSE chat endpoint. The chat
//! pipeline runs as a spawned task writing into a channel; the SSE stream
//! is just a consumer, so a client disconnect never cancels a turn and the
//! final response is persisted before any token is streamed.

use std::convert::Infallible;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::agent::graph::{GENERIC_APOLOGY, run_turn};
use crate::agent::turn::Turn;
use crate::config::CONFIG;
use crate::llm::Message;
use crate::state::AppState;

/// Characters per streamed token event.
const STREAM_CHUNK_CHARS: usize = 5;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/conversations", post(create_conversation).get(list_conversations))
        .route("/api/conversations/{id}", put(rename_conversation).delete(delete_conversation))
        .route("/api/conversations/{id}/messages", get(list_messages))
        .route("/api/memory/{id}", get(memory_status))
        .route("/api/search", get(search))
        .route("/api/wolfram/status", get(wolfram_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(what: &str) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: format!("{what} not found") }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        let err = err.into();
        error!("request failed: {:#}", err);
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(json!({"error": self.message}))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct CreateConversationRequest {
    title: Option<String>,
}

async fn create_conversation(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.unwrap_or_else(|| "Cuộc trò chuyện mới".to_string());
    let conversation = state.store.create_conversation(&title).await?;
    Ok(axum::Json(conversation))
}

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(axum::Json(state.store.list_conversations().await?))
}

#[derive(Deserialize)]
struct RenameRequest {
    title: String,
}

async fn rename_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<RenameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.rename_conversation(&id, &req.title).await? {
        return Err(ApiError::not_found("conversation"));
    }
    Ok(axum::Json(json!({"renamed": true})))
}

/// Deleting a conversation also resets its token counter, so a fresh
/// session under the same topic starts from zero.
async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_conversation(&id).await? {
        return Err(ApiError::not_found("conversation"));
    }
    state.agent.memory.reset(&id).await?;
    Ok(axum::Json(json!({"deleted": true})))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(axum::Json(state.store.list_messages(&id).await?))
}

async fn memory_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(axum::Json(state.agent.memory.status(&id, 0).await))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<i64>,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    Ok(axum::Json(state.store.search_messages(&query.q, limit).await?))
}

async fn wolfram_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let (used, limit) = state.agent.compute.quota_usage().await;
    Ok(axum::Json(json!({"used": used, "limit": limit, "remaining": (limit - used).max(0)})))
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

async fn chat(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if req.message.trim().is_empty() && req.images.is_empty() {
        return Err(ApiError::bad_request("message or images required"));
    }
    if req.images.len() > CONFIG.max_images_per_message {
        return Err(ApiError::bad_request(format!(
            "at most {} images per message",
            CONFIG.max_images_per_message
        )));
    }

    let conversation = match &req.session_id {
        Some(id) => state
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| ApiError::not_found("conversation"))?,
        None => {
            let title: String = req.message.chars().take(50).collect();
            let title = if title.is_empty() { "Cuộc trò chuyện mới".to_string() } else { title };
            state.store.create_conversation(&title).await?
        }
    };

    // History as the model sees it, before this turn's messages land
    let history: Vec<Message> = state
        .store
        .list_messages(&conversation.id)
        .await?
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| match m.role.as_str() {
            "assistant" => Message::assistant(&m.content),
            _ => Message::user(&m.content),
        })
        .collect();

    let image_data = if req.images.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&req.images)?)
    };
    state
        .store
        .insert_message(&conversation.id, "user", &req.message, image_data.as_deref())
        .await?;
    let placeholder = state
        .store
        .insert_message(&conversation.id, "assistant", "", None)
        .await?;

    let (tx, rx) = mpsc::channel::<Event>(64);
    let session_id = conversation.id.clone();

    // The pipeline owns its own task handle. Dropping the SSE stream only
    // closes the channel; the turn still runs to completion and persists.
    tokio::spawn(async move {
        let _ = tx
            .send(Event::default().data(
                json!({"type": "status", "stage": "processing", "session_id": session_id})
                    .to_string(),
            ))
            .await;

        let mut turn = Turn::new(session_id.clone(), history, req.message, req.images);
        run_turn(&state.agent, &mut turn).await;
        let final_text = turn
            .final_response
            .unwrap_or_else(|| GENERIC_APOLOGY.to_string());

        if let Err(e) = state
            .store
            .update_message_content(&placeholder.id, &final_text)
            .await
        {
            error!("failed to persist assistant response: {:#}", e);
        }

        let chars: Vec<char> = final_text.chars().collect();
        for chunk in chars.chunks(STREAM_CHUNK_CHARS) {
            let content: String = chunk.iter().collect();
            let event =
                Event::default().data(json!({"type": "token", "content": content}).to_string());
            if tx.send(event).await.is_err() {
                // Client is gone; the response is already in the database
                return;
            }
        }

        let memory = state.agent.memory.status(&session_id, 0).await;
        let _ = tx
            .send(Event::default().data(
                json!({
                    "type": "done",
                    "session_id": session_id,
                    "message_id": placeholder.id,
                    "memory": memory,
                })
                .to_string(),
            ))
            .await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&conversation.id) {
        response.headers_mut().insert("x-session-id", value);
    }
    Ok(response)
}
