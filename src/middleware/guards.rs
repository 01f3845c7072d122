use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;

/// Authenticated caller, populated by the auth middleware.
#[derive(Debug, Clone, Copy)]
pub struct User(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for User
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Uuid>()
            .copied()
            .map(User)
            .ok_or(AppError::Unauthorized)
    }
}

/// Membership guard for routes addressing a conversation. Non-members get
/// 403, never information about whether the conversation exists.
pub struct ConversationMember;

impl ConversationMember {
    pub async fn verify(
        state: &AppState,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        if ConversationService::is_active_member(&state.db, conversation_id, user_id).await? {
            Ok(())
        } else {
            Err(AppError::NotAMember)
        }
    }
}
