use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::guards::User;
use crate::models::conversation::{Conversation, ParticipantRole};
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};
use crate::websocket::RoomId;

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub role: Option<ParticipantRole>,
}

pub async fn add_member(
    State(state): State<AppState>,
    User(actor_id): User,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<Json<Conversation>> {
    let role = req.role.unwrap_or(ParticipantRole::Member);
    let conversation =
        ConversationService::add_participant(&state.db, conversation_id, actor_id, req.user_id, role)
            .await?;

    let event = OutboundEvent::MemberAdded {
        conversation: conversation.clone(),
        user_id: req.user_id,
        added_by: actor_id,
    };
    events::publish(&state.redis, RoomId::Conversation(conversation_id), &event).await?;
    // The new member's live connections are not in the room yet.
    events::publish_to_users(&state.redis, &[req.user_id], &event).await?;

    Ok(Json(conversation))
}

pub async fn remove_member(
    State(state): State<AppState>,
    User(actor_id): User,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Conversation>> {
    let conversation =
        ConversationService::remove_participant(&state.db, conversation_id, actor_id, user_id)
            .await?;

    let event = OutboundEvent::MemberRemoved {
        conversation: conversation.clone(),
        user_id,
        removed_by: actor_id,
    };
    events::publish(&state.redis, RoomId::Conversation(conversation_id), &event).await?;
    // The removed member has already left the room on other instances.
    events::publish_to_users(&state.redis, &[user_id], &event).await?;

    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: ParticipantRole,
}

pub async fn update_role(
    State(state): State<AppState>,
    User(actor_id): User,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RoleRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation =
        ConversationService::update_role(&state.db, conversation_id, actor_id, user_id, req.role)
            .await?;

    events::publish(
        &state.redis,
        RoomId::Conversation(conversation_id),
        &OutboundEvent::MemberRoleChanged {
            conversation: conversation.clone(),
            user_id,
            role: req.role,
            changed_by: actor_id,
        },
    )
    .await?;

    Ok(Json(conversation))
}
