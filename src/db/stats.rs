//! Subscriber counts per (board, kind, value) and the Top-N reads they feed.
//!
//! Increments go through an atomic upsert so two concurrent mutations never
//! read-modify-write the same pre-value; decrements clamp at zero.

use anyhow::Context as _;
use serde::Serialize;
use tokio_postgres::Client as DbClient;

use super::subscriptions::SubKind;

#[derive(Debug, Clone, Serialize)]
pub struct Stat {
    pub board: String,
    pub sub_type: SubKind,
    pub value: String,
    pub count: i32,
}

pub async fn increment(
    db: &DbClient,
    board: &str,
    kind: SubKind,
    value: &str,
) -> anyhow::Result<()> {
    db.execute(
        "INSERT INTO subscription_stats (board, sub_type, value, count)
         VALUES ($1, $2, $3, 1)
         ON CONFLICT (board, sub_type, value)
         DO UPDATE SET count = subscription_stats.count + 1, updated_at = NOW()",
        &[&board, &kind.as_str(), &value],
    )
    .await
    .context("incrementing stat")?;
    Ok(())
}

pub async fn decrement(
    db: &DbClient,
    board: &str,
    kind: SubKind,
    value: &str,
) -> anyhow::Result<()> {
    db.execute(
        "UPDATE subscription_stats
         SET count = GREATEST(count - 1, 0), updated_at = NOW()
         WHERE board = $1 AND sub_type = $2 AND value = $3",
        &[&board, &kind.as_str(), &value],
    )
    .await
    .context("decrementing stat")?;
    Ok(())
}

pub async fn increment_batch(
    db: &DbClient,
    board: &str,
    kind: SubKind,
    values: &[String],
) -> anyhow::Result<()> {
    for value in values {
        increment(db, board, kind, value).await?;
    }
    Ok(())
}

pub async fn decrement_batch(
    db: &DbClient,
    board: &str,
    kind: SubKind,
    values: &[String],
) -> anyhow::Result<()> {
    for value in values {
        decrement(db, board, kind, value).await?;
    }
    Ok(())
}

/// Highest-count rows for a kind, optionally restricted to one board. Rows
/// whose count fell to zero stay in the table but never rank.
pub async fn top(
    db: &DbClient,
    kind: SubKind,
    board: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Stat>> {
    let rows = match board {
        Some(board) => {
            db.query(
                "SELECT board, sub_type, value, count FROM subscription_stats
                 WHERE sub_type = $1 AND board = $2 AND count > 0
                 ORDER BY count DESC LIMIT $3",
                &[&kind.as_str(), &board, &limit],
            )
            .await
        }
        None => {
            db.query(
                "SELECT board, sub_type, value, count FROM subscription_stats
                 WHERE sub_type = $1 AND count > 0
                 ORDER BY count DESC LIMIT $2",
                &[&kind.as_str(), &limit],
            )
            .await
        }
    }
    .context("querying top stats")?;

    rows.iter()
        .map(|r| {
            let sub_type: String = r.get(1);
            Ok(Stat {
                board: r.get(0),
                sub_type: SubKind::parse(&sub_type)?,
                value: r.get(2),
                count: r.get(3),
            })
        })
        .collect()
}

pub async fn find_count(
    db: &DbClient,
    board: &str,
    kind: SubKind,
    value: &str,
) -> anyhow::Result<i32> {
    let row = db
        .query_opt(
            "SELECT count FROM subscription_stats
             WHERE board = $1 AND sub_type = $2 AND value = $3",
            &[&board, &kind.as_str(), &value],
        )
        .await
        .context("querying stat count")?;
    Ok(row.map(|r| r.get(0)).unwrap_or(0))
}
