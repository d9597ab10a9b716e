//! User accounts and per-role subscription limits.
//!
//! Registration and authentication live in the external API layer; the core
//! reads accounts for dispatch and limit checks, and creates them only on the
//! chat-initiated enrollment path.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::error::SqlState;
use tokio_postgres::Client as DbClient;

use crate::errors::Error;

/// Fallback when a user's role has no limit row.
const DEFAULT_MAX_SUBSCRIPTIONS: i32 = 3;

/// Roles that ship with the schema and must not be deleted.
pub const BUILTIN_ROLES: &[&str] = &["admin", "user"];

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleLimit {
    pub role: String,
    /// −1 means unlimited.
    pub max_subscriptions: i32,
    pub description: String,
}

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, role, enabled, created_at";

fn account_from_row(row: &tokio_postgres::Row) -> Account {
    Account {
        id: row.get(0),
        email: row.get(1),
        password_hash: row.get(2),
        role: row.get(3),
        enabled: row.get(4),
        created_at: row.get(5),
    }
}

pub async fn find_account(db: &DbClient, id: i32) -> anyhow::Result<Option<Account>> {
    let row = db
        .query_opt(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1"),
            &[&id],
        )
        .await
        .context("querying account")?;
    Ok(row.as_ref().map(account_from_row))
}

pub async fn find_account_by_email(
    db: &DbClient,
    email: &str,
) -> anyhow::Result<Option<Account>> {
    let row = db
        .query_opt(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"),
            &[&email],
        )
        .await
        .context("querying account by email")?;
    Ok(row.as_ref().map(account_from_row))
}

pub async fn create_account(
    db: &DbClient,
    email: &str,
    password_hash: &str,
    role: &str,
) -> anyhow::Result<Account> {
    let row = db
        .query_one(
            &format!(
                "INSERT INTO users (email, password_hash, role) VALUES ($1, $2, $3)
                 RETURNING {ACCOUNT_COLUMNS}"
            ),
            &[&email, &password_hash, &role],
        )
        .await
        .map_err(|e| {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                anyhow::Error::from(Error::Conflict("email already registered".into()))
            } else {
                anyhow::Error::from(e).context("creating account")
            }
        })?;
    Ok(account_from_row(&row))
}

/// Max subscriptions for a role; unknown roles fall back to the default so a
/// misconfigured role never locks users out entirely.
pub async fn max_subscriptions(db: &DbClient, role: &str) -> anyhow::Result<i32> {
    let row = db
        .query_opt(
            "SELECT max_subscriptions FROM role_limits WHERE role = $1",
            &[&role],
        )
        .await
        .context("querying role limit")?;
    Ok(row.map(|r| r.get(0)).unwrap_or(DEFAULT_MAX_SUBSCRIPTIONS))
}

pub async fn list_role_limits(db: &DbClient) -> anyhow::Result<Vec<RoleLimit>> {
    let rows = db
        .query(
            "SELECT role, max_subscriptions, description FROM role_limits
             ORDER BY CASE role WHEN 'admin' THEN 1 WHEN 'vip' THEN 2 ELSE 3 END",
            &[],
        )
        .await
        .context("listing role limits")?;
    Ok(rows
        .into_iter()
        .map(|r| RoleLimit {
            role: r.get(0),
            max_subscriptions: r.get(1),
            description: r.get(2),
        })
        .collect())
}

pub async fn upsert_role_limit(
    db: &DbClient,
    role: &str,
    max_subscriptions: i32,
    description: &str,
) -> anyhow::Result<RoleLimit> {
    let row = db
        .query_one(
            "INSERT INTO role_limits (role, max_subscriptions, description)
             VALUES ($1, $2, $3)
             ON CONFLICT (role) DO UPDATE SET
                 max_subscriptions = EXCLUDED.max_subscriptions,
                 description = EXCLUDED.description,
                 updated_at = NOW()
             RETURNING role, max_subscriptions, description",
            &[&role, &max_subscriptions, &description],
        )
        .await
        .context("upserting role limit")?;
    Ok(RoleLimit {
        role: row.get(0),
        max_subscriptions: row.get(1),
        description: row.get(2),
    })
}

/// Deletes a role limit. Built-in roles and roles still held by users are
/// rejected with Conflict.
pub async fn delete_role_limit(db: &DbClient, role: &str) -> anyhow::Result<()> {
    if BUILTIN_ROLES.contains(&role) {
        anyhow::bail!(Error::Conflict(format!("role {role} is built-in")));
    }
    let holders: i64 = db
        .query_one("SELECT COUNT(*) FROM users WHERE role = $1", &[&role])
        .await
        .context("counting role holders")?
        .get(0);
    if holders > 0 {
        anyhow::bail!(Error::Conflict(format!("role {role} is still in use")));
    }
    let deleted = db
        .execute("DELETE FROM role_limits WHERE role = $1", &[&role])
        .await
        .context("deleting role limit")?;
    if deleted == 0 {
        anyhow::bail!(Error::NotFound(format!("role {role} does not exist")));
    }
    Ok(())
}
