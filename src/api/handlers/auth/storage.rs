//! Database helpers for users, sessions, and one-time tokens.
//!
//! Every state transition is a conditional update scoped to "currently valid"
//! predicates, so concurrent requests racing on one token resolve in the
//! database: exactly one observes the row as valid and transitions it.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{generate_token, hash_token, is_unique_violation};

/// Shared authentication predicate: soft-deleted or deactivated users never
/// authenticate, refresh, or get new sessions.
const USER_AUTH_PREDICATE: &str = "users.active AND users.deleted_at IS NULL";

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub(crate) enum SignupOutcome {
    Created(UserRow),
    Conflict,
}

/// One-time token purposes. Consumption never crosses purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenPurpose {
    EmailVerify,
    PasswordReset,
}

impl TokenPurpose {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerify => "email_verify",
            Self::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug)]
pub(crate) struct UserRow {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) role: String,
    pub(crate) active: bool,
    pub(crate) email_verified_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl UserRow {
    pub(crate) fn from_row(row: &sqlx::postgres::PgRow) -> Self {
        Self {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            role: row.get("role"),
            active: row.get("active"),
            email_verified_at: row.get("email_verified_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Columns selected wherever a full user record is returned.
pub(crate) const USER_COLUMNS: &str =
    "id, username, email, role, active, email_verified_at, created_at, updated_at";

/// Minimal fields needed to check a password and mint tokens.
pub(crate) struct CredentialRecord {
    pub(crate) user_id: Uuid,
    pub(crate) username: String,
    pub(crate) password_hash: String,
    pub(crate) role: String,
}

/// Result of a successful session rotation.
pub(crate) struct RotatedSession {
    pub(crate) user_id: Uuid,
    pub(crate) username: String,
    pub(crate) role: String,
    pub(crate) refresh_token: String,
}

pub(crate) async fn insert_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<SignupOutcome> {
    let query = format!(
        r"
        INSERT INTO users (username, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING {USER_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created(UserRow::from_row(&row))),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

/// Look up login data by username, restricted to users allowed to
/// authenticate. Unknown, inactive, and soft-deleted accounts are
/// indistinguishable to the caller.
pub(crate) async fn lookup_credentials(
    pool: &PgPool,
    username: &str,
) -> Result<Option<CredentialRecord>> {
    let query = format!(
        r"
        SELECT id, username, password_hash, role
        FROM users
        WHERE username = $1 AND {USER_AUTH_PREDICATE}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(username)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup credentials")?;

    Ok(row.map(|row| CredentialRecord {
        user_id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
    }))
}

/// Look up a non-deleted user by email for verification/reset requests.
/// Returns the user id and current verification timestamp.
pub(crate) async fn lookup_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<(Uuid, Option<DateTime<Utc>>)>> {
    let query = r"
        SELECT id, email_verified_at
        FROM users
        WHERE email = $1 AND deleted_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| (row.get("id"), row.get("email_verified_at"))))
}

pub(crate) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
    device: Option<&str>,
    ip: Option<&str>,
) -> Result<String> {
    // Generate a random token, store only its hash, and return the raw value.
    let query = r"
        INSERT INTO user_sessions (user_id, token_hash, expires_at, device, ip)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'), $4, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .bind(device)
            .bind(ip)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Rotate a session: revoke the presented token and issue a replacement in
/// one transaction.
///
/// The revocation is a single conditional update whose predicate (unrevoked,
/// unexpired, owner allowed to authenticate) is evaluated and committed
/// atomically, so of two concurrent rotations of the same token exactly one
/// wins; the other matches zero rows and gets `None`. A deactivated or
/// deleted owner also yields `None`, without the session being rotated.
pub(crate) async fn rotate_session(
    pool: &PgPool,
    token_hash: &[u8],
    ttl_seconds: i64,
    device: Option<&str>,
    ip: Option<&str>,
) -> Result<Option<RotatedSession>> {
    let mut tx = pool.begin().await.context("begin rotation transaction")?;

    let query = format!(
        r"
        UPDATE user_sessions
        SET revoked_at = NOW()
        FROM users
        WHERE user_sessions.token_hash = $1
          AND user_sessions.revoked_at IS NULL
          AND user_sessions.expires_at > NOW()
          AND users.id = user_sessions.user_id
          AND {USER_AUTH_PREDICATE}
        RETURNING users.id AS user_id, users.username, users.role
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to revoke session for rotation")?;

    let Some(row) = row else {
        tx.rollback().await.context("rollback rotation")?;
        return Ok(None);
    };

    let user_id: Uuid = row.get("user_id");
    let username: String = row.get("username");
    let role: String = row.get("role");

    // A unique violation would abort the transaction, so the replacement is
    // inserted once; a 256-bit collision means the RNG is broken anyway.
    let token = generate_token()?;
    let new_hash = hash_token(&token);
    let query = r"
        INSERT INTO user_sessions (user_id, token_hash, expires_at, device, ip)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'), $4, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(new_hash)
        .bind(ttl_seconds)
        .bind(device)
        .bind(ip)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert rotated session")?;

    tx.commit().await.context("commit rotation transaction")?;

    Ok(Some(RotatedSession {
        user_id,
        username,
        role,
        refresh_token: token,
    }))
}

/// Revoke the matching unrevoked session. No-op if already revoked or
/// unknown; logout stays idempotent.
pub(crate) async fn revoke_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = r"
        UPDATE user_sessions
        SET revoked_at = NOW()
        WHERE token_hash = $1 AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke session")?;
    Ok(())
}

/// Revoke every unrevoked session owned by the user as one bulk conditional
/// update (logout-everywhere on password change and soft delete).
pub(crate) async fn revoke_all_sessions(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = r"
        UPDATE user_sessions
        SET revoked_at = NOW()
        WHERE user_id = $1 AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to revoke user sessions")?;
    Ok(result.rows_affected())
}

pub(crate) async fn issue_one_time_token(
    pool: &PgPool,
    user_id: Uuid,
    purpose: TokenPurpose,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO one_time_tokens (user_id, purpose, token_hash, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(purpose.as_str())
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert one-time token"),
        }
    }

    Err(anyhow!("failed to generate unique one-time token"))
}

/// Consume a one-time token: set `used_at` if it is unused and unexpired,
/// returning the owning user. `used_at`, once set, is permanent, and the
/// caller's follow-up state change must commit in the same transaction.
pub(crate) async fn consume_one_time_token(
    tx: &mut Transaction<'_, Postgres>,
    purpose: TokenPurpose,
    token_hash: &[u8],
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE one_time_tokens
        SET used_at = NOW()
        WHERE token_hash = $1
          AND purpose = $2
          AND used_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(purpose.as_str())
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume one-time token")?;

    Ok(row.map(|row| row.get("user_id")))
}

pub(crate) async fn mark_email_verified(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET email_verified_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;
    Ok(())
}

pub(crate) async fn update_password(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(())
}
