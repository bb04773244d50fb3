//! Login, refresh, and logout endpoints.
//!
//! Session state machine per client:
//! `NO_SESSION --login--> ACTIVE --refresh--> ACTIVE (new pair, old revoked)
//! --logout--> NO_SESSION`. A password change revokes every session of the
//! user at once.

use anyhow::anyhow;
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::error::ApiError;

use super::jwt;
use super::password::verify_password;
use super::state::AuthConfig;
use super::storage::{insert_session, lookup_credentials, revoke_session, rotate_session};
use super::types::{AckResponse, LoginRequest, LogoutRequest, RefreshRequest, TokenPairResponse};
use super::utils::{extract_client_ip, extract_device, hash_token};

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenPairResponse),
        (status = 400, description = "Missing payload", body = crate::api::error::ErrorBody),
        (status = 401, description = "Invalid credentials", body = crate::api::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::validation("Missing payload")),
    };

    // Unknown, inactive, deleted, and wrong-password cases all answer the
    // same way so callers cannot probe for accounts.
    let Some(record) = lookup_credentials(&pool, request.username.trim()).await? else {
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    if !verify_password(request.password, record.password_hash).await? {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let access_token = jwt::issue(
        config.jwt(),
        record.user_id,
        &record.username,
        &record.role,
    )
    .map_err(|err| ApiError::Internal(anyhow!(err)))?;

    let device = extract_device(&headers);
    let ip = extract_client_ip(&headers);
    let refresh_token = insert_session(
        &pool,
        record.user_id,
        config.session_ttl_seconds(),
        device.as_deref(),
        ip.as_deref(),
    )
    .await?;

    Ok(Json(TokenPairResponse {
        access_token,
        refresh_token,
    })
    .into_response())
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session rotated", body = TokenPairResponse),
        (status = 400, description = "Missing refresh token", body = crate::api::error::ErrorBody),
        (status = 401, description = "Invalid session", body = crate::api::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Response, ApiError> {
    let request: RefreshRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::validation("refresh_token required")),
    };

    let token = request.refresh_token.trim();
    if token.is_empty() {
        return Err(ApiError::validation("refresh_token required"));
    }

    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_token(token);
    let device = extract_device(&headers);
    let ip = extract_client_ip(&headers);

    let rotated = rotate_session(
        &pool,
        &token_hash,
        config.session_ttl_seconds(),
        device.as_deref(),
        ip.as_deref(),
    )
    .await?;

    // Reuse of an already-rotated token lands here as well; that is a strong
    // signal of token theft and is worth alerting on upstream.
    let Some(rotated) = rotated else {
        return Err(ApiError::unauthorized("Invalid session"));
    };

    let access_token = jwt::issue(
        config.jwt(),
        rotated.user_id,
        &rotated.username,
        &rotated.role,
    )
    .map_err(|err| ApiError::Internal(anyhow!(err)))?;

    Ok(Json(TokenPairResponse {
        access_token,
        refresh_token: rotated.refresh_token,
    })
    .into_response())
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logout acknowledged", body = AckResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    pool: Extension<PgPool>,
    payload: Option<Json<LogoutRequest>>,
) -> Result<Response, ApiError> {
    // Idempotent: the ack never reveals whether the token existed.
    let token = payload
        .and_then(|Json(request)| request.refresh_token)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    if let Some(token) = token {
        let token_hash = hash_token(&token);
        if let Err(err) = revoke_session(&pool, &token_hash).await {
            tracing::error!("Failed to revoke session on logout: {err}");
        }
    }

    Ok(Json(AckResponse::new("logout success")).into_response())
}
