use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::chat::{ChatMessage, MessageType, QuickMessage};
use crate::models::order::OrderId;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id/chat", post(open_chat).delete(close_chat))
        .route("/orders/:id/chat/messages", get(list_messages).post(send_message))
        .route("/orders/:id/chat/quick-replies", get(quick_replies))
        .route(
            "/orders/:id/chat/quick-replies/:reply_id",
            post(send_quick_reply),
        )
}

#[derive(Deserialize)]
pub struct SendMessageBody {
    pub message: String,
    #[serde(default)]
    pub message_type: MessageType,
}

async fn open_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    Ok(Json(state.tracker.open_chat(id).await?))
}

async fn close_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<StatusCode, AppError> {
    state.tracker.close_chat(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    Ok(Json(state.tracker.messages(id)?))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<SendMessageBody>,
) -> Result<Json<ChatMessage>, AppError> {
    let message = state
        .tracker
        .send_message(id, &payload.message, payload.message_type)
        .await?;
    Ok(Json(message))
}

async fn quick_replies(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<Vec<QuickMessage>>, AppError> {
    Ok(Json(state.tracker.quick_replies(id).await?))
}

async fn send_quick_reply(
    State(state): State<Arc<AppState>>,
    Path((id, reply_id)): Path<(OrderId, u64)>,
) -> Result<Json<ChatMessage>, AppError> {
    Ok(Json(state.tracker.send_quick_reply(id, reply_id).await?))
}
