use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub error_type: String,
    pub code: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<Uuid>,
}

pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => ("validation_error", "INVALID_REQUEST"),
        AppError::Unauthorized => ("authentication_error", "INVALID_CREDENTIALS"),
        AppError::NotAMember => ("authorization_error", "NOT_A_MEMBER"),
        AppError::PermissionDenied => ("authorization_error", "PERMISSION_DENIED"),
        AppError::EditWindowExpired { .. } => ("authorization_error", "EDIT_WINDOW_EXPIRED"),
        AppError::NotFound => ("not_found_error", "NOT_FOUND"),
        AppError::DuplicateDirectConversation { .. } => {
            ("conflict_error", "DUPLICATE_DIRECT_CONVERSATION")
        }
        AppError::AlreadyMember => ("conflict_error", "ALREADY_MEMBER"),
        AppError::CapacityExceeded { .. } => ("conflict_error", "CAPACITY_EXCEEDED"),
        AppError::OwnerMustTransfer => ("conflict_error", "OWNER_MUST_TRANSFER"),
        AppError::Unavailable => ("server_error", "SERVICE_UNAVAILABLE"),
        AppError::Config(_) | AppError::StartServer(_) => {
            ("server_error", "INTERNAL_SERVER_ERROR")
        }
        AppError::Database(_) => ("server_error", "DATABASE_ERROR"),
        AppError::Internal(_) => ("server_error", "INTERNAL_SERVER_ERROR"),
    };

    // Infrastructure details stay in the logs.
    let message = match err {
        AppError::Database(_) | AppError::Internal(_) => "internal error".to_owned(),
        other => other.to_string(),
    };
    let existing_id = match err {
        AppError::DuplicateDirectConversation { existing_id } => Some(*existing_id),
        _ => None,
    };

    let response = ErrorResponse {
        error: match status {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::CONFLICT => "Conflict",
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
        .to_owned(),
        message,
        status: status.as_u16(),
        error_type: error_type.to_owned(),
        code: code.to_owned(),
        retryable: err.is_retryable(),
        existing_id,
    };

    (status, response)
}

pub fn into_response(err: AppError) -> impl IntoResponse {
    if err.status_code() >= 500 {
        error!(error = %err, "request failed");
    } else {
        warn!(error = %err, "request rejected");
    }
    let (status, response) = map_error(&err);
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_direct_exposes_existing_id() {
        let existing = Uuid::new_v4();
        let (status, body) = map_error(&AppError::DuplicateDirectConversation {
            existing_id: existing,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code, "DUPLICATE_DIRECT_CONVERSATION");
        assert_eq!(body.error_type, "conflict_error");
        assert_eq!(body.existing_id, Some(existing));
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let (status, body) = map_error(&AppError::Internal("secret dsn".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "internal error");
        assert!(!serde_json::to_string(&body).unwrap().contains("secret"));
    }

    #[test]
    fn unavailable_is_marked_retryable() {
        let (status, body) = map_error(&AppError::Unavailable);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.retryable);
    }

    #[test]
    fn permission_failures_are_authorization_errors() {
        for err in [
            AppError::NotAMember,
            AppError::PermissionDenied,
            AppError::EditWindowExpired { max_edit_hours: 48 },
        ] {
            let (status, body) = map_error(&err);
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body.error_type, "authorization_error");
        }
    }
}
