use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::guards::User;
use crate::models::message::Message;
use crate::services::message_service::MessageService;
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};
use crate::websocket::RoomId;

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
}

pub async fn add(
    State(state): State<AppState>,
    User(user_id): User,
    Path(message_id): Path<Uuid>,
    Json(req): Json<ReactionRequest>,
) -> AppResult<Json<Message>> {
    let message =
        MessageService::add_reaction(&state.db, message_id, user_id, req.emoji).await?;

    events::publish(
        &state.redis,
        RoomId::Conversation(message.conversation_id),
        &OutboundEvent::ReactionAdded {
            message: message.clone(),
            user_id,
        },
    )
    .await?;

    Ok(Json(message))
}

pub async fn remove(
    State(state): State<AppState>,
    User(user_id): User,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<Message>> {
    let message = MessageService::remove_reaction(&state.db, message_id, user_id).await?;

    events::publish(
        &state.redis,
        RoomId::Conversation(message.conversation_id),
        &OutboundEvent::ReactionRemoved {
            message: message.clone(),
            user_id,
        },
    )
    .await?;

    Ok(Json(message))
}
