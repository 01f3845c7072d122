use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not a member of this conversation")]
    NotAMember,

    #[error("permission denied")]
    PermissionDenied,

    #[error("not found")]
    NotFound,

    #[error("a direct conversation between these users already exists")]
    DuplicateDirectConversation { existing_id: Uuid },

    #[error("user is already a member")]
    AlreadyMember,

    #[error("conversation has reached its member limit ({max_members})")]
    CapacityExceeded { max_members: i32 },

    #[error("owner must transfer ownership before leaving")]
    OwnerMustTransfer,

    #[error("edit window expired (max_edit_hours: {max_edit_hours})")]
    EditWindowExpired { max_edit_hours: i64 },

    #[error("service unavailable")]
    Unavailable,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient infrastructure failures the caller is expected to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            AppError::Unavailable => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Unauthorized => 401,
            AppError::NotAMember | AppError::PermissionDenied => 403,
            AppError::EditWindowExpired { .. } => 403,
            AppError::NotFound => 404,
            AppError::DuplicateDirectConversation { .. } => 409,
            AppError::AlreadyMember => 409,
            AppError::CapacityExceeded { .. } => 409,
            AppError::OwnerMustTransfer => 409,
            AppError::Unavailable => 503,
            _ => 500,
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(_: redis::RedisError) -> Self {
        AppError::Unavailable
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        crate::middleware::error_handling::into_response(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_direct_maps_to_conflict() {
        let err = AppError::DuplicateDirectConversation {
            existing_id: Uuid::new_v4(),
        };
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn authorization_failures_map_to_403() {
        assert_eq!(AppError::NotAMember.status_code(), 403);
        assert_eq!(AppError::PermissionDenied.status_code(), 403);
        assert_eq!(
            AppError::EditWindowExpired { max_edit_hours: 48 }.status_code(),
            403
        );
    }

    #[test]
    fn unavailable_is_retryable() {
        assert!(AppError::Unavailable.is_retryable());
        assert!(!AppError::PermissionDenied.is_retryable());
        assert!(!AppError::OwnerMustTransfer.is_retryable());
    }
}
