use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::guards::{ConversationMember, User};
use crate::models::conversation::Conversation;
use crate::services::conversation_service::{ConversationService, GroupMeta, SettingsPatch};
use crate::services::presence_service::PresenceService;
use crate::state::AppState;
use crate::websocket::events::{self, OutboundEvent};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreateConversation {
    Direct {
        user_id: Uuid,
    },
    Group {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        avatar_url: Option<String>,
        #[serde(default)]
        member_ids: Vec<Uuid>,
    },
}

pub async fn create(
    State(state): State<AppState>,
    User(user_id): User,
    Json(req): Json<CreateConversation>,
) -> AppResult<Json<Conversation>> {
    let conversation = match req {
        CreateConversation::Direct { user_id: other } => {
            ConversationService::create_direct(&state.db, user_id, other).await?
        }
        CreateConversation::Group {
            name,
            description,
            avatar_url,
            member_ids,
        } => {
            ConversationService::create_group(
                &state.db,
                user_id,
                GroupMeta {
                    name,
                    description,
                    avatar_url,
                },
                &member_ids,
                state.config.default_max_members,
            )
            .await?
        }
    };

    // New participants are not in the conversation room yet, so the
    // announcement goes to their personal rooms.
    let participant_ids: Vec<Uuid> = conversation
        .active_participants()
        .map(|p| p.user_id)
        .collect();
    events::publish_to_users(
        &state.redis,
        &participant_ids,
        &OutboundEvent::ConversationUpdated {
            conversation: conversation.clone(),
        },
    )
    .await?;

    Ok(Json(conversation))
}

pub async fn list(
    State(state): State<AppState>,
    User(user_id): User,
) -> AppResult<Json<Vec<Conversation>>> {
    Ok(Json(
        ConversationService::list_for_user(&state.db, user_id).await?,
    ))
}

pub async fn get(
    State(state): State<AppState>,
    User(user_id): User,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    ConversationMember::verify(&state, id, user_id).await?;
    Ok(Json(ConversationService::get(&state.db, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub mute_notifications: Option<bool>,
    pub allow_ai_replies: Option<bool>,
    pub auto_delete_days: Option<i32>,
    pub only_admins_can_add_members: Option<bool>,
    pub max_members: Option<i32>,
}

pub async fn update_settings(
    State(state): State<AppState>,
    User(user_id): User,
    Path(id): Path<Uuid>,
    Json(req): Json<SettingsRequest>,
) -> AppResult<Json<Conversation>> {
    if let Some(days) = req.auto_delete_days {
        if days < 0 {
            return Err(AppError::BadRequest(
                "auto_delete_days cannot be negative".into(),
            ));
        }
    }
    if let Some(max) = req.max_members {
        if max < 2 {
            return Err(AppError::BadRequest("max_members must be at least 2".into()));
        }
    }
    let conversation = ConversationService::update_settings(
        &state.db,
        id,
        user_id,
        SettingsPatch {
            name: req.name,
            description: req.description,
            avatar_url: req.avatar_url,
            mute_notifications: req.mute_notifications,
            allow_ai_replies: req.allow_ai_replies,
            auto_delete_days: req.auto_delete_days,
            only_admins_can_add_members: req.only_admins_can_add_members,
            max_members: req.max_members,
        },
    )
    .await?;

    events::publish(
        &state.redis,
        crate::websocket::RoomId::Conversation(id),
        &OutboundEvent::ConversationUpdated {
            conversation: conversation.clone(),
        },
    )
    .await?;

    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    pub archived: bool,
}

pub async fn set_archived(
    State(state): State<AppState>,
    User(user_id): User,
    Path(id): Path<Uuid>,
    Json(req): Json<ArchiveRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation =
        ConversationService::set_archived(&state.db, id, user_id, req.archived).await?;
    Ok(Json(conversation))
}

pub async fn delete(
    State(state): State<AppState>,
    User(user_id): User,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let conversation = ConversationService::get(&state.db, id).await?;
    let participant_ids: Vec<Uuid> = conversation
        .active_participants()
        .map(|p| p.user_id)
        .collect();

    ConversationService::soft_delete(&state.db, id, user_id).await?;

    let mut tombstoned = conversation;
    tombstoned.is_deleted = true;
    events::publish_to_users(
        &state.redis,
        &participant_ids,
        &OutboundEvent::ConversationUpdated {
            conversation: tombstoned,
        },
    )
    .await?;

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Serialize)]
pub struct TypingResponse {
    pub user_ids: Vec<Uuid>,
}

pub async fn typing(
    State(state): State<AppState>,
    User(user_id): User,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TypingResponse>> {
    ConversationMember::verify(&state, id, user_id).await?;
    let user_ids = PresenceService::typing_users(&state.redis, id).await?;
    Ok(Json(TypingResponse { user_ids }))
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: Uuid,
    pub online: bool,
}

pub async fn presence(
    State(state): State<AppState>,
    User(_caller): User,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<PresenceResponse>> {
    let online = PresenceService::is_online(&state.redis, user_id).await?;
    Ok(Json(PresenceResponse { user_id, online }))
}

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub user_ids: Vec<Uuid>,
}

pub async fn online_users(
    State(state): State<AppState>,
    User(_caller): User,
) -> AppResult<Json<OnlineUsersResponse>> {
    let user_ids = PresenceService::online_users(&state.redis).await?;
    Ok(Json(OnlineUsersResponse { user_ids }))
}
