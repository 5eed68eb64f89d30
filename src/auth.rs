//! Bearer token resolution.
//!
//! Tokens are HS256 JWTs minted by the users service. The caller id is read
//! from `id`, `userId` or `sub`, whichever is present first; numeric ids are
//! accepted and rendered as strings.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::api::response::ApiError;
use crate::AppState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing Bearer token")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token missing user id")]
    MissingUserId,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, rename = "userId")]
    user_id: Option<Value>,
    #[serde(default)]
    sub: Option<Value>,
}

fn claim_to_id(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolve the caller id carried by a token signed with `secret`.
pub fn resolve_caller(secret: &str, token: &str) -> Result<String, AuthError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        AuthError::InvalidToken
    })?;

    let claims = data.claims;
    claim_to_id(claims.id)
        .or_else(|| claim_to_id(claims.user_id))
        .or_else(|| claim_to_id(claims.sub))
        .ok_or(AuthError::MissingUserId)
}

/// The authenticated identity making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl Caller {
    pub fn id(&self) -> &str {
        &self.0
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized(AuthError::MissingToken.to_string()))?;

        resolve_caller(&state.config.auth.jwt_secret, token)
            .map(Caller)
            .map_err(|e| ApiError::unauthorized(e.to_string()))
    }
}
