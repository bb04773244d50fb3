//! Registration endpoint.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::error::ApiError;

use super::password::{hash_password, valid_password};
use super::state::AuthConfig;
use super::storage::{insert_user, SignupOutcome};
use super::types::{RegisterRequest, UserResponse};
use super::utils::{normalize_email, valid_email};

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registration successful", body = UserResponse),
        (status = 400, description = "Missing or invalid field", body = crate::api::error::ErrorBody),
        (status = 409, description = "Username or email already exists", body = crate::api::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<Response, ApiError> {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::validation("Missing payload")),
    };

    let username = request.username.trim().to_string();
    if username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }

    let email = normalize_email(&request.email);
    if email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if !valid_email(&email) {
        return Err(ApiError::validation("Invalid email"));
    }

    if !valid_password(&request.password, config.min_password_len()) {
        return Err(ApiError::validation(format!(
            "Password must be at least {} characters",
            config.min_password_len()
        )));
    }

    let password_hash = hash_password(request.password).await?;

    match insert_user(&pool, &username, &email, &password_hash).await? {
        SignupOutcome::Created(user) => {
            Ok((StatusCode::CREATED, Json(UserResponse::from(user))).into_response())
        }
        SignupOutcome::Conflict => Err(ApiError::conflict("Username or email already exists")),
    }
}
