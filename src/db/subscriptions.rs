//! Subscription rows. The service layer in [`crate::subscriptions`] wraps
//! these with validation, limits, stats and cache sync.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::error::SqlState;
use tokio_postgres::Client as DbClient;

use crate::errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubKind {
    Keyword,
    Author,
    Pushsum,
    Article,
}

impl SubKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubKind::Keyword => "keyword",
            SubKind::Author => "author",
            SubKind::Pushsum => "pushsum",
            SubKind::Article => "article",
        }
    }

    pub fn parse(s: &str) -> Result<SubKind, Error> {
        match s {
            "keyword" => Ok(SubKind::Keyword),
            "author" => Ok(SubKind::Author),
            "pushsum" => Ok(SubKind::Pushsum),
            "article" => Ok(SubKind::Article),
            other => Err(Error::Validation(format!(
                "unknown subscription kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for SubKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailTemplate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: i32,
    pub user_id: i32,
    pub board: String,
    pub sub_type: SubKind,
    pub value: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail: Option<MailTemplate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str =
    "id, user_id, board, sub_type, value, enabled, mail_subject, mail_content, created_at, updated_at";

fn from_row(row: &tokio_postgres::Row) -> anyhow::Result<Subscription> {
    let sub_type: String = row.get(3);
    let mail_subject: Option<String> = row.get(6);
    let mail_content: Option<String> = row.get(7);
    let mail = match (mail_subject, mail_content) {
        (None, None) => None,
        (subject, content) => Some(MailTemplate {
            subject: subject.unwrap_or_default(),
            content: content.unwrap_or_default(),
        }),
    };
    Ok(Subscription {
        id: row.get(0),
        user_id: row.get(1),
        board: row.get(2),
        sub_type: SubKind::parse(&sub_type)?,
        value: row.get(4),
        enabled: row.get(5),
        mail,
        created_at: row.get(8),
        updated_at: row.get(9),
    })
}

pub async fn insert(
    db: &DbClient,
    user_id: i32,
    board: &str,
    kind: SubKind,
    value: &str,
) -> anyhow::Result<Subscription> {
    let row = db
        .query_one(
            &format!(
                "INSERT INTO subscriptions (user_id, board, sub_type, value)
                 VALUES ($1, $2, $3, $4)
                 RETURNING {COLUMNS}"
            ),
            &[&user_id, &board, &kind.as_str(), &value],
        )
        .await
        .map_err(|e| {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                anyhow::Error::from(Error::Conflict("subscription already exists".into()))
            } else {
                anyhow::Error::from(e).context("inserting subscription")
            }
        })?;
    from_row(&row)
}

pub async fn find(db: &DbClient, id: i32) -> anyhow::Result<Option<Subscription>> {
    let row = db
        .query_opt(
            &format!("SELECT {COLUMNS} FROM subscriptions WHERE id = $1"),
            &[&id],
        )
        .await
        .context("querying subscription")?;
    row.as_ref().map(from_row).transpose()
}

pub async fn find_by_value(
    db: &DbClient,
    user_id: i32,
    board: &str,
    kind: SubKind,
    value: &str,
) -> anyhow::Result<Option<Subscription>> {
    let row = db
        .query_opt(
            &format!(
                "SELECT {COLUMNS} FROM subscriptions
                 WHERE user_id = $1 AND LOWER(board) = LOWER($2) AND sub_type = $3 AND value = $4"
            ),
            &[&user_id, &board, &kind.as_str(), &value],
        )
        .await
        .context("querying subscription by value")?;
    row.as_ref().map(from_row).transpose()
}

pub async fn list_by_user(db: &DbClient, user_id: i32) -> anyhow::Result<Vec<Subscription>> {
    let rows = db
        .query(
            &format!(
                "SELECT {COLUMNS} FROM subscriptions WHERE user_id = $1 ORDER BY updated_at DESC"
            ),
            &[&user_id],
        )
        .await
        .context("listing subscriptions")?;
    rows.iter().map(from_row).collect()
}

/// Every enabled subscription of the given kind, across all users. The
/// comment-tracking poller drives off this.
pub async fn list_by_kind(db: &DbClient, kind: SubKind) -> anyhow::Result<Vec<Subscription>> {
    let rows = db
        .query(
            &format!(
                "SELECT {COLUMNS} FROM subscriptions
                 WHERE sub_type = $1 AND enabled ORDER BY id"
            ),
            &[&kind.as_str()],
        )
        .await
        .context("listing subscriptions by kind")?;
    rows.iter().map(from_row).collect()
}

pub async fn count_by_user(db: &DbClient, user_id: i32) -> anyhow::Result<i64> {
    let row = db
        .query_one(
            "SELECT COUNT(*) FROM subscriptions WHERE user_id = $1",
            &[&user_id],
        )
        .await
        .context("counting subscriptions")?;
    Ok(row.get(0))
}

pub async fn update(
    db: &DbClient,
    id: i32,
    board: &str,
    kind: SubKind,
    value: &str,
    enabled: bool,
    mail: Option<&MailTemplate>,
) -> anyhow::Result<()> {
    let mail_subject = mail.map(|m| m.subject.as_str());
    let mail_content = mail.map(|m| m.content.as_str());
    db.execute(
        "UPDATE subscriptions
         SET board = $2, sub_type = $3, value = $4, enabled = $5,
             mail_subject = $6, mail_content = $7, updated_at = NOW()
         WHERE id = $1",
        &[
            &id,
            &board,
            &kind.as_str(),
            &value,
            &enabled,
            &mail_subject,
            &mail_content,
        ],
    )
    .await
    .map_err(|e| {
        if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            anyhow::Error::from(Error::Conflict("subscription already exists".into()))
        } else {
            anyhow::Error::from(e).context("updating subscription")
        }
    })?;
    Ok(())
}

pub async fn delete(db: &DbClient, id: i32) -> anyhow::Result<()> {
    db.execute("DELETE FROM subscriptions WHERE id = $1", &[&id])
        .await
        .context("deleting subscription")?;
    Ok(())
}

/// Whether the user still has another subscription with the same board and
/// kind; decides whether the cache subscriber-set entry survives a delete.
pub async fn has_other_for_board(
    db: &DbClient,
    user_id: i32,
    board: &str,
    kind: SubKind,
    excluding_id: i32,
) -> anyhow::Result<bool> {
    let row = db
        .query_one(
            "SELECT COUNT(*) FROM subscriptions
             WHERE user_id = $1 AND board = $2 AND sub_type = $3 AND id <> $4",
            &[&user_id, &board, &kind.as_str(), &excluding_id],
        )
        .await
        .context("counting sibling subscriptions")?;
    let count: i64 = row.get(0);
    Ok(count > 0)
}

/// The comment count this subscription has already been notified up to, or
/// `None` before its first tracking round. Keyed per subscription: the shared
/// article row is rewritten by other pollers and cannot serve as a baseline.
pub async fn seen_comment_count(
    db: &DbClient,
    subscription_id: i32,
) -> anyhow::Result<Option<i32>> {
    let row = db
        .query_opt(
            "SELECT seen_comment_count FROM tracked_article_state WHERE subscription_id = $1",
            &[&subscription_id],
        )
        .await
        .context("querying tracked article state")?;
    Ok(row.map(|r| r.get(0)))
}

pub async fn set_seen_comment_count(
    db: &DbClient,
    subscription_id: i32,
    count: i32,
) -> anyhow::Result<()> {
    db.execute(
        "INSERT INTO tracked_article_state (subscription_id, seen_comment_count)
         VALUES ($1, $2)
         ON CONFLICT (subscription_id) DO UPDATE SET
             seen_comment_count = EXCLUDED.seen_comment_count,
             updated_at = NOW()",
        &[&subscription_id, &count],
    )
    .await
    .context("storing tracked article state")?;
    Ok(())
}

/// (user_id, board) pairs for every enabled subscription, used to rebuild the
/// cache projection from scratch.
pub async fn list_enabled(db: &DbClient) -> anyhow::Result<Vec<Subscription>> {
    let rows = db
        .query(
            &format!("SELECT {COLUMNS} FROM subscriptions WHERE enabled ORDER BY user_id"),
            &[],
        )
        .await
        .context("listing enabled subscriptions")?;
    rows.iter().map(from_row).collect()
}
