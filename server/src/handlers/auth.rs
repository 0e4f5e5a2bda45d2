use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::config::cors::{USER_ID_HEADER, USER_ROLE_HEADER};
use crate::models::user::{Actor, Role};
use crate::utils::error::AppError;

/// The caller as forwarded by the gateway in `X-User-Id` / `X-User-Role`.
/// A missing role means an ordinary user.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError("Missing X-User-Id header".to_string()))?;
        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| AppError::AuthError("X-User-Id must be a UUID".to_string()))?;

        let role = match header(USER_ROLE_HEADER) {
            Some(raw) => raw.parse::<Role>().map_err(AppError::AuthError)?,
            None => Role::User,
        };

        Ok(Actor::new(user_id, role))
    }
}
