//! Append-only audit trail for sensitive actions.
//!
//! Rows are inserted inside the transaction of the action they describe and
//! are never updated or deleted by this service.

use anyhow::{Context, Result};
use sqlx::{Postgres, Transaction};
use tracing::Instrument;
use uuid::Uuid;

pub(crate) const ACTION_USER_UPDATE: &str = "USER_UPDATE";
pub(crate) const ACTION_USER_DELETE: &str = "USER_DELETE";
pub(crate) const ACTION_PASSWORD_RESET: &str = "PASSWORD_RESET";
pub(crate) const ACTION_PASSWORD_CHANGE: &str = "PASSWORD_CHANGE";

pub(crate) const RESOURCE_USER: &str = "USER";

/// Append one audit entry. `actor` is `None` for system-initiated actions.
pub(crate) async fn record(
    tx: &mut Transaction<'_, Postgres>,
    actor: Option<Uuid>,
    action: &str,
    resource: &str,
    resource_id: Option<Uuid>,
    metadata: serde_json::Value,
) -> Result<()> {
    let metadata_text =
        serde_json::to_string(&metadata).context("failed to serialize audit metadata")?;

    let query = r"
        INSERT INTO audit_logs (actor_user_id, action, resource, resource_id, metadata)
        VALUES ($1, $2, $3, $4, $5::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(actor)
        .bind(action)
        .bind(resource)
        .bind(resource_id)
        .bind(metadata_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert audit entry")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_tags_are_stable() {
        assert_eq!(ACTION_USER_UPDATE, "USER_UPDATE");
        assert_eq!(ACTION_USER_DELETE, "USER_DELETE");
        assert_eq!(ACTION_PASSWORD_RESET, "PASSWORD_RESET");
        assert_eq!(ACTION_PASSWORD_CHANGE, "PASSWORD_CHANGE");
        assert_eq!(RESOURCE_USER, "USER");
    }
}
