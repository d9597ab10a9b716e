//! Notification bindings: the link between an account and a chat identity.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::error::SqlState;
use tokio_postgres::Client as DbClient;

use crate::errors::Error;

pub const SERVICE_TELEGRAM: &str = "telegram";
pub const SERVICE_LINE: &str = "line";
pub const SERVICE_DISCORD: &str = "discord";

pub const KNOWN_SERVICES: &[&str] = &[SERVICE_TELEGRAM, SERVICE_LINE, SERVICE_DISCORD];

/// How long an issued bind code stays redeemable, in minutes.
pub const BIND_CODE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub id: i32,
    pub user_id: i32,
    pub service: String,
    pub service_id: String,
    #[serde(skip_serializing)]
    pub bind_code: Option<String>,
    #[serde(skip_serializing)]
    pub bind_code_expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl Binding {
    pub fn is_confirmed(&self) -> bool {
        !self.service_id.is_empty()
    }

    pub fn code_is_valid(&self, code: &str, now: DateTime<Utc>) -> bool {
        match (&self.bind_code, self.bind_code_expires_at) {
            (Some(stored), Some(expires)) => stored == code && now <= expires,
            _ => false,
        }
    }
}

const COLUMNS: &str = "id, user_id, service, service_id, bind_code, bind_code_expires_at, enabled";

fn from_row(row: &tokio_postgres::Row) -> Binding {
    Binding {
        id: row.get(0),
        user_id: row.get(1),
        service: row.get(2),
        service_id: row.get(3),
        bind_code: row.get(4),
        bind_code_expires_at: row.get(5),
        enabled: row.get(6),
    }
}

fn map_unique(e: tokio_postgres::Error, what: &str) -> anyhow::Error {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        anyhow::Error::from(Error::Conflict(what.to_string()))
    } else {
        anyhow::Error::from(e)
    }
}

/// Creates a confirmed binding in one step (chat-initiated enrollment).
pub async fn create(
    db: &DbClient,
    user_id: i32,
    service: &str,
    service_id: &str,
) -> anyhow::Result<Binding> {
    let row = db
        .query_one(
            &format!(
                "INSERT INTO notification_bindings (user_id, service, service_id)
                 VALUES ($1, $2, $3)
                 RETURNING {COLUMNS}"
            ),
            &[&user_id, &service, &service_id],
        )
        .await
        .map_err(|e| map_unique(e, "this chat identity is already bound"))?;
    Ok(from_row(&row))
}

pub async fn find_by_user_and_service(
    db: &DbClient,
    user_id: i32,
    service: &str,
) -> anyhow::Result<Option<Binding>> {
    let row = db
        .query_opt(
            &format!(
                "SELECT {COLUMNS} FROM notification_bindings
                 WHERE user_id = $1 AND service = $2"
            ),
            &[&user_id, &service],
        )
        .await
        .context("querying binding")?;
    Ok(row.as_ref().map(from_row))
}

pub async fn find_by_service_id(
    db: &DbClient,
    service: &str,
    service_id: &str,
) -> anyhow::Result<Option<Binding>> {
    let row = db
        .query_opt(
            &format!(
                "SELECT {COLUMNS} FROM notification_bindings
                 WHERE service = $1 AND service_id = $2"
            ),
            &[&service, &service_id],
        )
        .await
        .context("querying binding by service id")?;
    Ok(row.as_ref().map(from_row))
}

pub async fn find_by_bind_code(
    db: &DbClient,
    service: &str,
    code: &str,
) -> anyhow::Result<Option<Binding>> {
    let row = db
        .query_opt(
            &format!(
                "SELECT {COLUMNS} FROM notification_bindings
                 WHERE service = $1 AND bind_code = $2"
            ),
            &[&service, &code],
        )
        .await
        .context("querying binding by bind code")?;
    Ok(row.as_ref().map(from_row))
}

pub async fn list_by_user(db: &DbClient, user_id: i32) -> anyhow::Result<Vec<Binding>> {
    let rows = db
        .query(
            &format!("SELECT {COLUMNS} FROM notification_bindings WHERE user_id = $1"),
            &[&user_id],
        )
        .await
        .context("listing bindings")?;
    Ok(rows.iter().map(from_row).collect())
}

/// Stores a fresh bind code on the (user, service) row, creating the pending
/// row when the user has never enrolled that service.
pub async fn set_bind_code(
    db: &DbClient,
    user_id: i32,
    service: &str,
    code: &str,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    db.execute(
        "INSERT INTO notification_bindings (user_id, service, bind_code, bind_code_expires_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (user_id, service) DO UPDATE SET
             bind_code = EXCLUDED.bind_code,
             bind_code_expires_at = EXCLUDED.bind_code_expires_at,
             updated_at = NOW()",
        &[&user_id, &service, &code, &expires_at],
    )
    .await
    .context("storing bind code")?;
    Ok(())
}

/// Fills in the chat identity and clears the pending code.
pub async fn confirm(
    db: &DbClient,
    user_id: i32,
    service: &str,
    service_id: &str,
) -> anyhow::Result<()> {
    db.execute(
        "UPDATE notification_bindings
         SET service_id = $3, bind_code = NULL, bind_code_expires_at = NULL, updated_at = NOW()
         WHERE user_id = $1 AND service = $2",
        &[&user_id, &service, &service_id],
    )
    .await
    .map_err(|e| map_unique(e, "this chat identity is already bound"))?;
    Ok(())
}

pub async fn set_enabled(
    db: &DbClient,
    user_id: i32,
    service: &str,
    enabled: bool,
) -> anyhow::Result<()> {
    let updated = db
        .execute(
            "UPDATE notification_bindings SET enabled = $3, updated_at = NOW()
             WHERE user_id = $1 AND service = $2",
            &[&user_id, &service, &enabled],
        )
        .await
        .context("toggling binding")?;
    if updated == 0 {
        anyhow::bail!(Error::NotFound("binding not found".into()));
    }
    Ok(())
}

pub async fn delete(db: &DbClient, user_id: i32, service: &str) -> anyhow::Result<()> {
    let deleted = db
        .execute(
            "DELETE FROM notification_bindings WHERE user_id = $1 AND service = $2",
            &[&user_id, &service],
        )
        .await
        .context("deleting binding")?;
    if deleted == 0 {
        anyhow::bail!(Error::NotFound("binding not found".into()));
    }
    Ok(())
}
