//! Admin user management endpoints.
//!
//! Flow Overview:
//! 1) Authenticate the bearer access token and require the admin role.
//! 2) Perform reads or allow-listed updates against non-deleted users.
//! 3) Record an audit entry for every mutation.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::sync::Arc;
use tracing::Instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::handlers::audit;
use crate::api::handlers::auth::password::{hash_password, valid_password};
use crate::api::handlers::auth::principal::{require_admin, Role};
use crate::api::handlers::auth::storage::{revoke_all_sessions, UserRow, USER_COLUMNS};
use crate::api::handlers::auth::types::UserResponse;
use crate::api::handlers::auth::{normalize_email, valid_email, AuthConfig};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub q: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListFiltersEcho {
    pub q: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserListResponse {
    pub page: i64,
    pub size: i64,
    pub total: i64,
    pub total_pages: i64,
    pub sort: String,
    pub dir: String,
    pub filters: ListFiltersEcho,
    pub data: Vec<UserResponse>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
}

struct ListFilters {
    q: Option<String>,
    role: Option<String>,
    active: Option<bool>,
    created_from: Option<DateTime<Utc>>,
    created_to: Option<DateTime<Utc>>,
}

fn clamp_page(page: Option<i64>) -> i64 {
    page.unwrap_or(1).max(1)
}

fn clamp_size(size: Option<i64>) -> i64 {
    size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Sort columns are allow-listed; anything else falls back to `created_at`.
fn sortable_field(field: Option<&str>) -> &'static str {
    match field {
        Some("username") => "username",
        Some("email") => "email",
        Some("role") => "role",
        Some("active") => "active",
        Some("updated_at") => "updated_at",
        _ => "created_at",
    }
}

fn sort_direction(dir: Option<&str>) -> &'static str {
    match dir {
        Some(value) if value.eq_ignore_ascii_case("asc") => "ASC",
        _ => "DESC",
    }
}

fn parse_timestamp(value: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|_| ApiError::validation(format!("Invalid {field} timestamp"))),
    }
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &ListFilters) {
    // Listing only ever sees non-deleted users.
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(q) = &filters.q {
        let like = format!("%{q}%");
        builder
            .push(" AND (username ILIKE ")
            .push_bind(like.clone())
            .push(" OR email ILIKE ")
            .push_bind(like)
            .push(")");
    }
    if let Some(role) = &filters.role {
        builder.push(" AND role = ").push_bind(role.clone());
    }
    if let Some(active) = filters.active {
        builder.push(" AND active = ").push_bind(active);
    }
    if let Some(from) = filters.created_from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filters.created_to {
        builder.push(" AND created_at <= ").push_bind(to);
    }
}

async fn fetch_users_page(
    pool: &PgPool,
    filters: &ListFilters,
    sort: &str,
    dir: &str,
    page: i64,
    size: i64,
) -> anyhow::Result<(Vec<UserRow>, i64)> {
    let mut count_builder = QueryBuilder::new("SELECT COUNT(*) AS total FROM users");
    push_user_filters(&mut count_builder, filters);
    let total: i64 = count_builder
        .build()
        .fetch_one(pool)
        .await
        .map(|row| row.get("total"))?;

    let mut builder = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
    push_user_filters(&mut builder, filters);
    builder.push(format!(" ORDER BY {sort} {dir}"));
    builder.push(" LIMIT ").push_bind(size);
    builder.push(" OFFSET ").push_bind((page - 1) * size);

    let rows = builder.build().fetch_all(pool).await?;
    let users = rows.iter().map(UserRow::from_row).collect();

    Ok((users, total))
}

#[utoipa::path(
    get,
    path = "/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Paginated user listing", body = UserListResponse),
        (status = 401, description = "Missing or invalid access token", body = crate::api::error::ErrorBody),
        (status = 403, description = "Admin role required", body = crate::api::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Response, ApiError> {
    require_admin(&headers, &config)?;

    let page = clamp_page(query.page);
    let size = clamp_size(query.size);
    let sort = sortable_field(query.sort.as_deref());
    let dir = sort_direction(query.dir.as_deref());

    let filters = ListFilters {
        q: query
            .q
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        role: query
            .role
            .as_deref()
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty()),
        active: query.active,
        created_from: parse_timestamp(query.created_from.as_deref(), "created_from")?,
        created_to: parse_timestamp(query.created_to.as_deref(), "created_to")?,
    };

    let (users, total) = fetch_users_page(&pool, &filters, sort, dir, page, size).await?;

    let total_pages = if total == 0 {
        0
    } else {
        (total + size - 1) / size
    };

    let response = UserListResponse {
        page,
        size,
        total,
        total_pages,
        sort: sort.to_string(),
        dir: dir.to_lowercase(),
        filters: ListFiltersEcho {
            q: filters.q,
            role: filters.role,
            active: filters.active,
            created_from: filters.created_from.map(|ts| ts.to_rfc3339()),
            created_to: filters.created_to.map(|ts| ts.to_rfc3339()),
        },
        data: users.into_iter().map(UserResponse::from).collect(),
    };

    Ok(Json(response).into_response())
}

/// Apply an admin patch to a user. Email and password changes are always
/// allowed; role/active changes require `is_admin`.
async fn update_user_record(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    user_id: Uuid,
    email: Option<&str>,
    password_hash: Option<&str>,
    role: Option<&str>,
    active: Option<bool>,
    is_admin: bool,
) -> anyhow::Result<Option<UserRow>> {
    let (role, active) = if is_admin { (role, active) } else { (None, None) };

    let query = format!(
        r"
        UPDATE users
        SET email = COALESCE($2, email),
            password_hash = COALESCE($3, password_hash),
            role = COALESCE($4, role),
            active = COALESCE($5, active),
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING {USER_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .bind(active)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await?;

    Ok(row.map(|row| UserRow::from_row(&row)))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    params(
        ("id" = String, Path, description = "User id")
    ),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 400, description = "Invalid input", body = crate::api::error::ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = crate::api::error::ErrorBody),
        (status = 403, description = "Admin role required", body = crate::api::error::ErrorBody),
        (status = 404, description = "User not found", body = crate::api::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update_user(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<UpdateUserRequest>>,
) -> Result<Response, ApiError> {
    let principal = require_admin(&headers, &config)?;

    let user_id = Uuid::parse_str(id.trim()).map_err(|_| ApiError::validation("Invalid user id"))?;

    let request: UpdateUserRequest = match payload {
        Some(Json(payload)) => payload,
        None => return Err(ApiError::validation("Missing payload")),
    };

    if request.email.is_none()
        && request.password.is_none()
        && request.role.is_none()
        && request.active.is_none()
    {
        return Err(ApiError::validation("No updates provided"));
    }

    let email = match request.email.as_deref() {
        Some(raw) => {
            let normalized = normalize_email(raw);
            if !valid_email(&normalized) {
                return Err(ApiError::validation("Invalid email"));
            }
            Some(normalized)
        }
        None => None,
    };

    let role = match request.role.as_deref() {
        Some(raw) => Some(
            Role::parse(raw)
                .ok_or_else(|| ApiError::validation("Invalid role"))?
                .as_str(),
        ),
        None => None,
    };

    let password_hash = match request.password {
        Some(password) => {
            if !valid_password(&password, config.min_password_len()) {
                return Err(ApiError::validation(format!(
                    "Password must be at least {} characters",
                    config.min_password_len()
                )));
            }
            Some(hash_password(password).await?)
        }
        None => None,
    };

    let mut changed: Vec<&str> = Vec::new();
    if email.is_some() {
        changed.push("email");
    }
    if password_hash.is_some() {
        changed.push("password");
    }
    if role.is_some() {
        changed.push("role");
    }
    if request.active.is_some() {
        changed.push("active");
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    let updated = update_user_record(
        &mut tx,
        user_id,
        email.as_deref(),
        password_hash.as_deref(),
        role,
        request.active,
        true,
    )
    .await?;

    let Some(updated) = updated else {
        let _ = tx.rollback().await;
        return Err(ApiError::not_found("User not found"));
    };

    audit::record(
        &mut tx,
        Some(principal.user_id),
        audit::ACTION_USER_UPDATE,
        audit::RESOURCE_USER,
        Some(user_id),
        json!({ "fields": changed }),
    )
    .await?;

    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    Ok(Json(UserResponse::from(updated)).into_response())
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(
        ("id" = String, Path, description = "User id")
    ),
    responses(
        (status = 204, description = "User soft-deleted"),
        (status = 400, description = "Invalid user id", body = crate::api::error::ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = crate::api::error::ErrorBody),
        (status = 403, description = "Admin role required", body = crate::api::error::ErrorBody),
        (status = 404, description = "User not found", body = crate::api::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn delete_user(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
) -> Result<Response, ApiError> {
    let principal = require_admin(&headers, &config)?;

    let user_id = Uuid::parse_str(id.trim()).map_err(|_| ApiError::validation("Invalid user id"))?;

    // Soft delete, the session sweep, and the audit entry commit together.
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    let query = r"
        UPDATE users
        SET deleted_at = NOW(),
            active = FALSE,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING deleted_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    let Some(row) = row else {
        let _ = tx.rollback().await;
        return Err(ApiError::not_found("User not found"));
    };
    let deleted_at: DateTime<Utc> = row.get("deleted_at");

    let revoked = revoke_all_sessions(&mut tx, user_id).await?;

    audit::record(
        &mut tx,
        Some(principal.user_id),
        audit::ACTION_USER_DELETE,
        audit::RESOURCE_USER,
        Some(user_id),
        json!({
            "deleted_at": deleted_at.to_rfc3339(),
            "sessions_revoked": revoked,
        }),
    )
    .await?;

    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::jwt::{self, JwtConfig};
    use anyhow::Result;
    use axum::http::{header::AUTHORIZATION, HeaderValue};
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn auth_config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig::new(
            "http://localhost:3000".to_string(),
            JwtConfig::new(SecretString::from("test-secret")),
        ))
    }

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    fn bearer(config: &AuthConfig, role: &str) -> HeaderMap {
        let token = jwt::issue(config.jwt(), Uuid::new_v4(), "root", role).expect("issue token");
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        headers
    }

    fn empty_query() -> ListUsersQuery {
        ListUsersQuery {
            page: None,
            size: None,
            sort: None,
            dir: None,
            q: None,
            role: None,
            active: None,
            created_from: None,
            created_to: None,
        }
    }

    #[test]
    fn page_and_size_are_clamped() {
        assert_eq!(clamp_page(None), 1);
        assert_eq!(clamp_page(Some(0)), 1);
        assert_eq!(clamp_page(Some(-3)), 1);
        assert_eq!(clamp_page(Some(7)), 7);

        assert_eq!(clamp_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_size(Some(0)), 1);
        assert_eq!(clamp_size(Some(1000)), MAX_PAGE_SIZE);
        assert_eq!(clamp_size(Some(25)), 25);
    }

    #[test]
    fn sort_fields_are_allow_listed() {
        assert_eq!(sortable_field(Some("username")), "username");
        assert_eq!(sortable_field(Some("updated_at")), "updated_at");
        assert_eq!(sortable_field(Some("password_hash")), "created_at");
        assert_eq!(sortable_field(Some("; DROP TABLE users")), "created_at");
        assert_eq!(sortable_field(None), "created_at");
    }

    #[test]
    fn sort_direction_defaults_to_desc() {
        assert_eq!(sort_direction(Some("asc")), "ASC");
        assert_eq!(sort_direction(Some("ASC")), "ASC");
        assert_eq!(sort_direction(Some("desc")), "DESC");
        assert_eq!(sort_direction(Some("sideways")), "DESC");
        assert_eq!(sort_direction(None), "DESC");
    }

    #[test]
    fn parse_timestamp_accepts_rfc3339() {
        let parsed = parse_timestamp(Some("2026-01-02T03:04:05Z"), "created_from")
            .expect("should parse")
            .expect("should be some");
        assert_eq!(parsed.timestamp(), 1_767_323_045);

        assert!(parse_timestamp(None, "created_from")
            .expect("none ok")
            .is_none());
        assert!(parse_timestamp(Some(" "), "created_from")
            .expect("blank ok")
            .is_none());
        assert!(parse_timestamp(Some("yesterday"), "created_from").is_err());
    }

    #[tokio::test]
    async fn list_users_requires_token() -> Result<()> {
        let err = list_users(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_config()),
            Query(empty_query()),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn list_users_requires_admin_role() -> Result<()> {
        let config = auth_config();
        let err = list_users(
            bearer(&config, "user"),
            Extension(lazy_pool()?),
            Extension(config.clone()),
            Query(empty_query()),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn list_users_rejects_bad_timestamp() -> Result<()> {
        let config = auth_config();
        let mut query = empty_query();
        query.created_from = Some("yesterday".to_string());
        let err = list_users(
            bearer(&config, "admin"),
            Extension(lazy_pool()?),
            Extension(config.clone()),
            Query(query),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn update_user_rejects_invalid_id() -> Result<()> {
        let config = auth_config();
        let err = update_user(
            Path("not-a-uuid".to_string()),
            bearer(&config, "admin"),
            Extension(lazy_pool()?),
            Extension(config.clone()),
            None,
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn update_user_rejects_empty_patch() -> Result<()> {
        let config = auth_config();
        let err = update_user(
            Path(Uuid::new_v4().to_string()),
            bearer(&config, "admin"),
            Extension(lazy_pool()?),
            Extension(config.clone()),
            Some(Json(UpdateUserRequest {
                email: None,
                password: None,
                role: None,
                active: None,
            })),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "No updates provided");
        Ok(())
    }

    #[tokio::test]
    async fn update_user_rejects_unknown_role() -> Result<()> {
        let config = auth_config();
        let err = update_user(
            Path(Uuid::new_v4().to_string()),
            bearer(&config, "admin"),
            Extension(lazy_pool()?),
            Extension(config.clone()),
            Some(Json(UpdateUserRequest {
                email: None,
                password: None,
                role: Some("root".to_string()),
                active: None,
            })),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn delete_user_requires_admin_role() -> Result<()> {
        let config = auth_config();
        let err = delete_user(
            Path(Uuid::new_v4().to_string()),
            bearer(&config, "user"),
            Extension(lazy_pool()?),
            Extension(config.clone()),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn delete_user_rejects_invalid_id() -> Result<()> {
        let config = auth_config();
        let err = delete_user(
            Path("42".to_string()),
            bearer(&config, "admin"),
            Extension(lazy_pool()?),
            Extension(config.clone()),
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
