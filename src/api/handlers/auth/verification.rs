//! Email verification endpoints.

use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};

use crate::api::error::ApiError;

use super::state::AuthConfig;
use super::storage::{
    consume_one_time_token, issue_one_time_token, lookup_user_by_email, mark_email_verified,
    TokenPurpose,
};
use super::types::{AckResponse, EmailRequest, TokenRequestAck, VerifyEmailRequest};
use super::utils::{build_verify_url, hash_token, normalize_email, valid_email};

const REQUEST_ACK_MESSAGE: &str = "If the account exists, a verification link has been sent";

#[utoipa::path(
    post,
    path = "/auth/request-verify",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Request acknowledged (identical whether or not the account exists)", body = TokenRequestAck)
    ),
    tag = "auth"
)]
pub async fn request_verify(
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
            error!("Failed to lookup user for verification request: {err}");
            return Ok(ack(None));
        }
    };

    let (user_id, email_verified_at) = match user {
        Some(found) => found,
        None => return Ok(ack(None)),
    };
    if email_verified_at.is_some() {
        return Ok(ack(None));
    }

    match issue_one_time_token(
        &pool,
        user_id,
        TokenPurpose::EmailVerify,
        config.verify_token_ttl_seconds(),
    )
    .await
    {
        Ok(token) => {
            // Delivery is a collaborator concern; the link only surfaces in
            // responses when --expose-tokens is set.
            debug!(
                "verification link: {}",
                build_verify_url(config.frontend_base_url(), &token)
            );
            let exposed = config.expose_tokens().then_some(token);
            Ok(ack(exposed))
        }
        Err(err) => {
            error!("Failed to issue verification token: {err}");
            Ok(ack(None))
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = AckResponse),
        (status = 400, description = "Invalid or expired token", body = crate::api::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> Result<Response, ApiError> {
    let request: VerifyEmailRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::validation("Missing payload")),
    };

    let token = request.token.trim();
    if token.is_empty() {
        return Err(ApiError::validation("Missing token"));
    }

    let token_hash = hash_token(token);

    // Consumption and the user update commit together, so a crash between
    // the two never leaves the token consumable twice.
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    let Some(user_id) = consume_one_time_token(&mut tx, TokenPurpose::EmailVerify, &token_hash)
        .await?
    else {
        let _ = tx.rollback().await;
        return Err(ApiError::validation("Invalid or expired token"));
    };

    mark_email_verified(&mut tx, user_id).await?;

    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    Ok(Json(AckResponse::new("email verified")).into_response())
}
