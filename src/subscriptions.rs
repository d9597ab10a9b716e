//! Subscription mutations: validate, write the store, then reconcile the
//! cache and stat counters.
//!
//! The durable row is always written first; cache and stats follow
//! asynchronously and are eventually consistent (the store is the recovery
//! source, see [`crate::sync::rebuild`]).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Context as _;

use crate::db::accounts;
use crate::db::stats;
use crate::db::subscriptions as repo;
use crate::db::subscriptions::{MailTemplate, SubKind, Subscription};
use crate::errors::Error;
use crate::matching;
use crate::ptt::feed;
use crate::sync;
use crate::Context;

/// Validates the value shape for its kind; keyword patterns are compiled here
/// so bad regexes never reach the pollers.
fn validate_value(kind: SubKind, value: &str) -> Result<(), Error> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation("value must not be empty".into()));
    }
    match kind {
        SubKind::Keyword => matching::parse_keyword(value).map(|_| ()),
        SubKind::Pushsum => {
            let n: i32 = value
                .parse()
                .map_err(|_| Error::Validation("push threshold must be a number".into()))?;
            if n == 0 {
                return Err(Error::Validation("push threshold must not be zero".into()));
            }
            Ok(())
        }
        SubKind::Author => {
            if value.contains(char::is_whitespace) {
                return Err(Error::Validation("author must be a single id".into()));
            }
            Ok(())
        }
        SubKind::Article => {
            if !value.starts_with("M.") {
                return Err(Error::Validation("article code looks invalid".into()));
            }
            Ok(())
        }
    }
}

async fn validate_board(ctx: &Context, board: &str) -> anyhow::Result<()> {
    if board.trim().is_empty() {
        anyhow::bail!(Error::Validation("board must not be empty".into()));
    }
    let exists = feed::board_exists(&ctx.ptt, &ctx.cache, board)
        .await
        .map_err(|e| Error::Transient(format!("could not verify board: {e}")))?;
    if !exists {
        anyhow::bail!(Error::Validation(format!("board {board} does not exist")));
    }
    Ok(())
}

async fn check_limit(ctx: &Context, user_id: i32, role: &str) -> anyhow::Result<()> {
    let db = ctx.db.get().await?;
    let max = accounts::max_subscriptions(&db, role).await?;
    if max < 0 {
        return Ok(());
    }
    let count = repo::count_by_user(&db, user_id).await?;
    if count >= max as i64 {
        anyhow::bail!(Error::Conflict("subscription limit reached".into()));
    }
    Ok(())
}

fn spawn_stat_change(ctx: &Arc<Context>, board: String, kind: SubKind, value: String, incr: bool) {
    // article subscriptions are personal and ephemeral, they never rank
    if kind == SubKind::Article {
        return;
    }
    let values = match kind {
        SubKind::Keyword => matching::stat_values(&value),
        _ => vec![value],
    };
    if values.is_empty() {
        return;
    }
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let result = async {
            let db = ctx.db.get().await?;
            if incr {
                stats::increment_batch(&db, &board, kind, &values).await
            } else {
                stats::decrement_batch(&db, &board, kind, &values).await
            }
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(%board, kind = %kind, "stat sync failed: {e:?}");
        }
    });
}

pub async fn create(
    ctx: &Arc<Context>,
    user_id: i32,
    board: &str,
    kind: SubKind,
    value: &str,
) -> anyhow::Result<Subscription> {
    let value = value.trim();
    validate_value(kind, value)?;

    let account = {
        let db = ctx.db.get().await?;
        accounts::find_account(&db, user_id)
            .await?
            .ok_or_else(|| Error::NotFound("account not found".into()))?
    };
    check_limit(ctx, user_id, &account.role).await?;
    validate_board(ctx, board).await?;

    let sub = {
        let db = ctx.db.get().await?;
        repo::insert(&db, user_id, board, kind, value).await?
    };

    {
        let ctx = ctx.clone();
        let sub = sub.clone();
        tokio::spawn(async move {
            if let Err(e) = sync::after_create(&ctx, &sub).await {
                tracing::warn!(user_id = sub.user_id, "cache sync failed: {e:?}");
            }
        });
    }
    spawn_stat_change(ctx, sub.board.clone(), kind, sub.value.clone(), true);

    Ok(sub)
}

#[allow(clippy::too_many_arguments)]
pub async fn update(
    ctx: &Arc<Context>,
    user_id: i32,
    id: i32,
    board: &str,
    kind: SubKind,
    value: &str,
    enabled: bool,
    mail: Option<MailTemplate>,
) -> anyhow::Result<Subscription> {
    let value = value.trim();
    validate_value(kind, value)?;

    let old = {
        let db = ctx.db.get().await?;
        repo::find(&db, id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| Error::NotFound("subscription not found".into()))?
    };
    validate_board(ctx, board).await?;

    {
        let db = ctx.db.get().await?;
        repo::update(&db, id, board, kind, value, enabled, mail.as_ref()).await?;
    }

    let changed =
        old.board != board || old.sub_type != kind || old.value != value || old.enabled != enabled;
    if changed {
        spawn_stat_change(ctx, old.board.clone(), old.sub_type, old.value.clone(), false);
        spawn_stat_change(ctx, board.to_string(), kind, value.to_string(), true);
    }

    let updated = {
        let db = ctx.db.get().await?;
        repo::find(&db, id)
            .await?
            .ok_or_else(|| Error::Integrity("subscription vanished mid-update".into()))?
    };
    {
        let ctx = ctx.clone();
        let old = old.clone();
        let updated = updated.clone();
        tokio::spawn(async move {
            if let Err(e) = sync::after_update(&ctx, &old, &updated).await {
                tracing::warn!(user_id = updated.user_id, "cache sync failed: {e:?}");
            }
        });
    }

    Ok(updated)
}

pub async fn delete(ctx: &Arc<Context>, user_id: i32, id: i32) -> anyhow::Result<()> {
    let sub = {
        let db = ctx.db.get().await?;
        repo::find(&db, id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| Error::NotFound("subscription not found".into()))?
    };

    {
        let db = ctx.db.get().await?;
        repo::delete(&db, id).await?;
    }

    {
        let ctx = ctx.clone();
        let sub = sub.clone();
        tokio::spawn(async move {
            if let Err(e) = sync::after_delete(&ctx, &sub).await {
                tracing::warn!(user_id = sub.user_id, "cache sync failed: {e:?}");
            }
        });
    }
    spawn_stat_change(ctx, sub.board.clone(), sub.sub_type, sub.value.clone(), false);

    Ok(())
}

/// Deletes by (board, kind, value), the shape chat commands use.
pub async fn delete_by_value(
    ctx: &Arc<Context>,
    user_id: i32,
    board: &str,
    kind: SubKind,
    value: &str,
) -> anyhow::Result<()> {
    let sub = {
        let db = ctx.db.get().await?;
        repo::find_by_value(&db, user_id, board, kind, value)
            .await?
            .ok_or_else(|| Error::NotFound("subscription not found".into()))?
    };
    delete(ctx, user_id, sub.id).await
}

pub async fn list(ctx: &Context, user_id: i32) -> anyhow::Result<Vec<Subscription>> {
    let db = ctx.db.get().await?;
    repo::list_by_user(&db, user_id).await
}

/// The grouped plain-text rendering chat commands reply with.
pub async fn list_formatted(ctx: &Context, user_id: i32) -> anyhow::Result<String> {
    let subs = list(ctx, user_id).await?;
    if subs.iter().all(|s| !s.enabled) {
        return Ok("尚未建立訂閱清單。".to_string());
    }

    let mut keywords: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut authors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut pushsums: BTreeMap<String, String> = BTreeMap::new();
    for sub in subs.into_iter().filter(|s| s.enabled) {
        match sub.sub_type {
            SubKind::Keyword => keywords.entry(sub.board).or_default().push(sub.value),
            SubKind::Author => authors.entry(sub.board).or_default().push(sub.value),
            SubKind::Pushsum => {
                pushsums.insert(sub.board, sub.value);
            }
            SubKind::Article => {}
        }
    }

    let mut out = String::from("關鍵字\n");
    for (board, mut values) in keywords {
        values.sort();
        writeln!(out, "{}: {}", board, values.join(", ")).context("formatting keywords")?;
    }
    out.push_str("----\n作者\n");
    for (board, mut values) in authors {
        values.sort();
        writeln!(out, "{}: {}", board, values.join(", ")).context("formatting authors")?;
    }
    out.push_str("----\n推文數\n");
    for (board, value) in pushsums {
        writeln!(out, "{}: {}", board, value).context("formatting pushsums")?;
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_validation_per_kind() {
        assert!(validate_value(SubKind::Keyword, "問卦").is_ok());
        assert!(validate_value(SubKind::Keyword, "regexp:[").is_err());
        assert!(validate_value(SubKind::Keyword, " ").is_err());
        assert!(validate_value(SubKind::Pushsum, "50").is_ok());
        assert!(validate_value(SubKind::Pushsum, "-20").is_ok());
        assert!(validate_value(SubKind::Pushsum, "0").is_err());
        assert!(validate_value(SubKind::Pushsum, "many").is_err());
        assert!(validate_value(SubKind::Author, "alice").is_ok());
        assert!(validate_value(SubKind::Author, "a b").is_err());
        assert!(validate_value(SubKind::Article, "M.1512733113.A.47B").is_ok());
        assert!(validate_value(SubKind::Article, "nope").is_err());
    }
}
