use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Uuid, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized)?;
    Ok(data.claims.sub)
}

pub fn issue_jwt(user_id: Uuid, secret: &str, ttl_seconds: i64) -> Result<String, AppError> {
    let claims = Claims {
        sub: user_id,
        exp: chrono::Utc::now().timestamp() + ttl_seconds,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("jwt encoding: {e}")))
}

/// Bearer auth for the REST surface. Leaves the caller's id in request
/// extensions for the extractors downstream.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;
    let user_id = verify_jwt(token, &state.config.jwt_secret)?;
    request.extensions_mut().insert(user_id);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let user = Uuid::new_v4();
        let token = issue_jwt(user, "secret", 3600).unwrap();
        assert_eq!(verify_jwt(&token, "secret").unwrap(), user);
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = issue_jwt(Uuid::new_v4(), "secret", 3600).unwrap();
        assert!(matches!(
            verify_jwt(&token, "other"),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn expired_token_rejected() {
        let token = issue_jwt(Uuid::new_v4(), "secret", -120).unwrap();
        assert!(matches!(
            verify_jwt(&token, "secret"),
            Err(AppError::Unauthorized)
        ));
    }
}
