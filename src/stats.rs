//! Top-N rankings and the alerts-sent counter.

use std::fmt::Write as _;

use anyhow::Context as _;

use crate::db::stats as repo;
use crate::db::stats::Stat;
use crate::db::subscriptions::SubKind;
use crate::errors::Error;
use crate::Context;

pub const DEFAULT_TOP_LIMIT: i64 = 10;

pub async fn top(
    ctx: &Context,
    kind: SubKind,
    board: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Stat>> {
    if kind == SubKind::Article {
        anyhow::bail!(Error::Validation(
            "article subscriptions are not ranked".into()
        ));
    }
    let db = ctx.db.get().await?;
    repo::top(&db, kind, board, limit.clamp(1, 100)).await
}

/// The formatted ranking reply chat commands use.
pub async fn ranking_formatted(ctx: &Context, limit: i64) -> anyhow::Result<String> {
    let db = ctx.db.get().await?;
    let mut out = String::from("關鍵字");
    for (i, stat) in repo::top(&db, SubKind::Keyword, None, limit)
        .await?
        .iter()
        .enumerate()
    {
        write!(out, "\n{}. {}:{}", i + 1, stat.board, stat.value).context("formatting ranking")?;
    }
    out.push_str("\n----\n作者");
    for (i, stat) in repo::top(&db, SubKind::Author, None, limit)
        .await?
        .iter()
        .enumerate()
    {
        write!(out, "\n{}. {}:{}", i + 1, stat.board, stat.value).context("formatting ranking")?;
    }
    out.push_str("\n----\n推噓文");
    for (i, stat) in repo::top(&db, SubKind::Pushsum, None, limit)
        .await?
        .iter()
        .enumerate()
    {
        write!(out, "\n{}. {}:{}", i + 1, stat.board, stat.value).context("formatting ranking")?;
    }
    Ok(out)
}

pub async fn alerts_sent(ctx: &Context) -> anyhow::Result<i64> {
    ctx.cache.alerts_sent().await
}
