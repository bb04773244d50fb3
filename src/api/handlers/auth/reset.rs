//! Password reset and change endpoints.
//!
//! Both flows replace the stored hash and revoke every session of the user
//! in one transaction, forcing re-authentication everywhere.

use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};

use crate::api::error::ApiError;
use crate::api::handlers::audit;

use super::password::{hash_password, valid_password, verify_password};
use super::principal::require_auth;
use super::state::AuthConfig;
use super::storage::{
    consume_one_time_token, issue_one_time_token, lookup_credentials, lookup_user_by_email,
    revoke_all_sessions, update_password, TokenPurpose,
};
use super::types::{AckResponse, ChangePasswordRequest, EmailRequest, ResetPasswordRequest,
    TokenRequestAck};
use super::utils::{hash_token, normalize_email, valid_email};

const REQUEST_ACK_MESSAGE: &str = "If the account exists, a reset link has been sent";

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Request acknowledged (identical whether or not the account exists)", body = TokenRequestAck)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<EmailRequest>>,
) -> Result<Response, ApiError> {
    let ack = |token: Option<String>| {
        Json(TokenRequestAck {
            message: REQUEST_ACK_MESSAGE.to_string(),
            token,
        })
        .into_response()
    };

    // Every exit below acknowledges identically to avoid account probing.
    let Some(Json(request)) = payload else {
        return Ok(ack(None));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Ok(ack(None));
    }

    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to lookup user for reset request: {err}");
            return Ok(ack(None));
        }
    };

    let Some((user_id, _)) = user else {
        return Ok(ack(None));
    };

    match issue_one_time_token(
        &pool,
        user_id,
        TokenPurpose::PasswordReset,
        config.reset_token_ttl_seconds(),
    )
    .await
    {
        Ok(token) => {
            debug!("reset token issued for {user_id}");
            let exposed = config.expose_tokens().then_some(token);
            Ok(ack(exposed))
        }
        Err(err) => {
            error!("Failed to issue reset token: {err}");
            Ok(ack(None))
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = AckResponse),
        (status = 400, description = "Invalid/expired token or weak password", body = crate::api::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Response, ApiError> {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::validation("Missing payload")),
    };

    // Policy is checked before any store access.
    if !valid_password(&request.new_password, config.min_password_len()) {
        return Err(ApiError::validation(format!(
            "Password must be at least {} characters",
            config.min_password_len()
        )));
    }

    let token = request.token.trim();
    if token.is_empty() {
        return Err(ApiError::validation("Missing token"));
    }

    let token_hash = hash_token(token);
    let password_hash = hash_password(request.new_password).await?;

    // Token consumption, the new hash, and the session sweep commit together.
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    let Some(user_id) = consume_one_time_token(&mut tx, TokenPurpose::PasswordReset, &token_hash)
        .await?
    else {
        let _ = tx.rollback().await;
        return Err(ApiError::validation("Invalid or expired token"));
    };

    update_password(&mut tx, user_id, &password_hash).await?;
    let revoked = revoke_all_sessions(&mut tx, user_id).await?;
    audit::record(
        &mut tx,
        Some(user_id),
        audit::ACTION_PASSWORD_RESET,
        audit::RESOURCE_USER,
        Some(user_id),
        json!({ "sessions_revoked": revoked }),
    )
    .await?;

    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    Ok(Json(AckResponse::new("password updated")).into_response())
}

#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = AckResponse),
        (status = 400, description = "Invalid old password or weak new password", body = crate::api::error::ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = crate::api::error::ErrorBody),
        (status = 404, description = "User not found", body = crate::api::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &config)?;

    let request: ChangePasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::validation("Missing payload")),
    };

    if request.old_password.trim().is_empty() {
        return Err(ApiError::validation("old_password is required"));
    }
    if !valid_password(&request.new_password, config.min_password_len()) {
        return Err(ApiError::validation(format!(
            "Password must be at least {} characters",
            config.min_password_len()
        )));
    }

    // The caller must re-prove the current password even with a valid token.
    let Some(record) = lookup_credentials(&pool, &principal.username).await? else {
        return Err(ApiError::not_found("User not found"));
    };

    if !verify_password(request.old_password, record.password_hash).await? {
        return Err(ApiError::validation("Old password is incorrect"));
    }

    let password_hash = hash_password(request.new_password).await?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    update_password(&mut tx, record.user_id, &password_hash).await?;
    let revoked = revoke_all_sessions(&mut tx, record.user_id).await?;
    audit::record(
        &mut tx,
        Some(record.user_id),
        audit::ACTION_PASSWORD_CHANGE,
        audit::RESOURCE_USER,
        Some(record.user_id),
        json!({ "sessions_revoked": revoked }),
    )
    .await?;

    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    Ok(Json(AckResponse::new("password changed")).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::jwt::{self, JwtConfig};
    use anyhow::Result;
    use axum::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    fn auth_config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig::new(
            "http://localhost:3000".to_string(),
            JwtConfig::new(SecretString::from("test-secret")),
        ))
    }

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    fn bearer(config: &AuthConfig) -> HeaderMap {
        let token =
            jwt::issue(config.jwt(), Uuid::new_v4(), "alice", "user").expect("issue token");
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        headers
    }

    #[tokio::test]
    async fn forgot_password_missing_payload_still_acknowledges() -> Result<()> {
        let response = forgot_password(Extension(lazy_pool()?), Extension(auth_config()), None)
            .await
            .expect("should succeed")
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_rejects_short_password_before_store_access() -> Result<()> {
        // The lazy pool would fail on first use; a policy error proves the
        // store was never touched.
        let err = reset_password(
            Extension(lazy_pool()?),
            Extension(auth_config()),
            Some(Json(ResetPasswordRequest {
                token: "some-token".to_string(),
                new_password: "short".to_string(),
            })),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_missing_token() -> Result<()> {
        let err = reset_password(
            Extension(lazy_pool()?),
            Extension(auth_config()),
            Some(Json(ResetPasswordRequest {
                token: " ".to_string(),
                new_password: "secret1".to_string(),
            })),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn change_password_requires_bearer_token() -> Result<()> {
        let err = change_password(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_config()),
            None,
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn change_password_missing_old_password() -> Result<()> {
        let config = auth_config();
        let err = change_password(
            bearer(&config),
            Extension(lazy_pool()?),
            Extension(config.clone()),
            Some(Json(ChangePasswordRequest {
                old_password: "  ".to_string(),
                new_password: "secret2".to_string(),
            })),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn change_password_short_new_password() -> Result<()> {
        let config = auth_config();
        let err = change_password(
            bearer(&config),
            Extension(lazy_pool()?),
            Extension(config.clone()),
            Some(Json(ChangePasswordRequest {
                old_password: "secret1".to_string(),
                new_password: "short".to_string(),
            })),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
