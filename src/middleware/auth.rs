//! Authentication extractor
//!
//! Verifies the bearer token and yields the caller's identity. Role and
//! onboarding checks happen in the services against the stored user record.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{verify_token, AuthConfig, JwtError, TokenType};
use crate::error::LendingError;

/// Caller identity taken from a verified access token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthConfig>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = LendingError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    LendingError::Unauthorized(
                        "Authorization header with Bearer token required".to_string(),
                    )
                })?;

        let auth = Arc::<AuthConfig>::from_ref(state);

        let claims = verify_token(bearer.token(), auth.jwt_secret()).map_err(|e| match e {
            JwtError::TokenExpired => LendingError::Unauthorized("Token has expired".to_string()),
            _ => LendingError::Unauthorized("Invalid token".to_string()),
        })?;

        if claims.token_type != TokenType::Access.as_str() {
            return Err(LendingError::Unauthorized(
                "Expected access token".to_string(),
            ));
        }

        let user_id = claims
            .user_id()
            .map_err(|_| LendingError::Unauthorized("Invalid user ID in token".to_string()))?;
        // Authorization uses the stored role; the claim only has to be well-formed.
        claims
            .user_role()
            .map_err(|_| LendingError::Unauthorized("Invalid role in token".to_string()))?;

        Ok(AuthenticatedUser { user_id })
    }
}
