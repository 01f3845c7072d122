use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::guards::User;
use crate::models::message::{Message, MessageBody};
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::{Cursor, MessageService, NewMessage};
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};
use crate::websocket::RoomId;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub body: MessageBody,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub is_ai_generated: bool,
    #[serde(default)]
    pub temp_id: Option<String>,
}

pub async fn send(
    State(state): State<AppState>,
    User(user_id): User,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendRequest>,
) -> AppResult<Json<Message>> {
    let message = MessageService::append(
        &state.db,
        conversation_id,
        NewMessage {
            sender_id: user_id,
            body: req.body,
            reply_to: req.reply_to,
            is_ai_generated: req.is_ai_generated,
        },
    )
    .await?;

    events::publish(
        &state.redis,
        RoomId::Conversation(conversation_id),
        &OutboundEvent::MessageCreated {
            message: message.clone(),
            temp_id: req.temp_id,
        },
    )
    .await?;

    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    User(user_id): User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<ListResponse>> {
    let cursor = params.cursor.as_deref().map(Cursor::decode).transpose()?;
    let page = MessageService::list(
        &state.db,
        conversation_id,
        user_id,
        cursor,
        params.limit.unwrap_or(50),
        state.config.max_page_size,
    )
    .await?;
    Ok(Json(ListResponse {
        messages: page.messages,
        next_cursor: page.next_cursor,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub text: String,
}

pub async fn edit(
    State(state): State<AppState>,
    User(user_id): User,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditRequest>,
) -> AppResult<Json<Message>> {
    let message = MessageService::edit(
        &state.db,
        message_id,
        user_id,
        req.text,
        state.config.edit_window_hours,
    )
    .await?;

    events::publish(
        &state.redis,
        RoomId::Conversation(message.conversation_id),
        &OutboundEvent::MessageEdited {
            message: message.clone(),
        },
    )
    .await?;

    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub for_everyone: bool,
}

pub async fn delete(
    State(state): State<AppState>,
    User(user_id): User,
    Path(message_id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> AppResult<Json<serde_json::Value>> {
    let message =
        MessageService::delete(&state.db, message_id, user_id, params.for_everyone).await?;

    let room = RoomId::Conversation(message.conversation_id);
    let event = OutboundEvent::MessageDeleted {
        message,
        for_everyone: params.for_everyone,
    };
    if params.for_everyone {
        events::publish(&state.redis, room, &event).await?;
    } else {
        events::publish_to_users(&state.redis, &[user_id], &event).await?;
    }

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct ContextParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ContextEntry {
    pub sender_id: Uuid,
    pub text: String,
}

/// Prompt-building window for the AI reply collaborator: the most recent
/// visible text messages, oldest first.
pub async fn context(
    State(state): State<AppState>,
    User(user_id): User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<ContextParams>,
) -> AppResult<Json<Vec<ContextEntry>>> {
    ConversationService::require_member(&state.db, conversation_id, user_id).await?;
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let entries = MessageService::recent_context(&state.db, conversation_id, limit)
        .await?
        .into_iter()
        .map(|(sender_id, text)| ContextEntry { sender_id, text })
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: Vec<Uuid>,
}

pub async fn mark_read(
    State(state): State<AppState>,
    User(user_id): User,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<Json<MarkReadResponse>> {
    let marked =
        MessageService::mark_read(&state.db, conversation_id, user_id, &req.message_ids).await?;

    if !marked.is_empty() {
        events::publish(
            &state.redis,
            RoomId::Conversation(conversation_id),
            &OutboundEvent::ReadMarked {
                conversation_id,
                user_id,
                messages: marked.clone(),
            },
        )
        .await?;
    }

    Ok(Json(MarkReadResponse {
        marked: marked.into_iter().map(|m| m.id).collect(),
    }))
}
