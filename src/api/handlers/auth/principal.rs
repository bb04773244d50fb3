//! Authenticated principal extraction and authorization helpers.
//!
//! Bearer access tokens are verified locally (signature + expiry + issuer);
//! no database read happens here. Session revocation does not invalidate an
//! already-issued access token before its natural expiry.

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::api::error::ApiError;

use super::jwt;
use super::state::AuthConfig;
use super::utils::extract_bearer_token;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Parse a role tag case-insensitively (`user`, `ADMIN`, ...).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Authenticated user context derived from a bearer access token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

/// Resolve the bearer access token into a principal, or fail with 401.
pub(crate) fn require_auth(headers: &HeaderMap, config: &AuthConfig) -> Result<Principal, ApiError> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

    let claims = jwt::verify(config.jwt(), &token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired access token"))?;

    let user_id = Uuid::parse_str(&claims.uid)
        .map_err(|_| ApiError::unauthorized("Invalid or expired access token"))?;
    let role = Role::parse(&claims.role)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired access token"))?;

    Ok(Principal {
        user_id,
        username: claims.sub,
        role,
    })
}

/// Like [`require_auth`], but additionally requires the admin role.
pub(crate) fn require_admin(
    headers: &HeaderMap,
    config: &AuthConfig,
) -> Result<Principal, ApiError> {
    let principal = require_auth(headers, config)?;
    if principal.role != Role::Admin {
        return Err(ApiError::forbidden("Admin role required"));
    }
    Ok(principal)
}
