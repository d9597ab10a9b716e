//! Cache reconciliation: keeps the Redis projection in step with the store.
//!
//! Every mutation writes the store first; these routines then patch the
//! subscriber sets and rewrite the denormalized profile. All writes are
//! idempotent, so replays and races degrade to harmless repeats. When the
//! projection is suspect, [`rebuild`] reconstructs it wholesale.

use std::collections::BTreeMap;

use crate::cache::{web_account, BoardSubs, PushThresholds, UserProfile};
use crate::db::bindings::{self, SERVICE_TELEGRAM};
use crate::db::subscriptions::{self as repo, SubKind, Subscription};
use crate::db::{accounts, DbClient};
use crate::Context;

/// Parses a pushsum subscription value into thresholds: "50" alerts on the
/// way up, "-20" on the way down.
pub fn parse_push_value(value: &str) -> PushThresholds {
    let n: i32 = value.trim().parse().unwrap_or(0);
    if n > 0 {
        PushThresholds { up: n, down: 0 }
    } else if n < 0 {
        PushThresholds { up: 0, down: n }
    } else {
        PushThresholds::default()
    }
}

/// Builds the dispatch-time profile from enabled subscriptions.
pub fn build_profile(
    account: String,
    enabled: bool,
    telegram_chat: Option<i64>,
    subs: &[Subscription],
) -> UserProfile {
    let mut boards: BTreeMap<String, BoardSubs> = BTreeMap::new();
    for sub in subs.iter().filter(|s| s.enabled) {
        let entry = boards.entry(sub.board.clone()).or_insert_with(|| BoardSubs {
            board: sub.board.clone(),
            ..BoardSubs::default()
        });
        match sub.sub_type {
            SubKind::Keyword => entry.keywords.push(sub.value.clone()),
            SubKind::Author => entry.authors.push(sub.value.clone()),
            SubKind::Pushsum => entry.push_sum = parse_push_value(&sub.value),
            // tracked articles are driven straight off the store
            SubKind::Article => {}
        }
    }
    UserProfile {
        account,
        enabled,
        telegram_chat,
        subscribes: boards.into_values().collect(),
    }
}

/// The user's confirmed, enabled telegram chat id, if any.
async fn telegram_chat(db: &DbClient, user_id: i32) -> anyhow::Result<Option<i64>> {
    let binding = bindings::find_by_user_and_service(db, user_id, SERVICE_TELEGRAM).await?;
    Ok(binding
        .filter(|b| b.is_confirmed() && b.enabled)
        .and_then(|b| b.service_id.parse().ok()))
}

/// Rewrites `user:<account>` from the store. Without a confirmed binding
/// there is nothing to dispatch to, so the profile is removed instead.
pub async fn rewrite_profile(ctx: &Context, user_id: i32) -> anyhow::Result<()> {
    let account = web_account(user_id);
    let db = ctx.db.get().await?;
    let Some(acc) = accounts::find_account(&db, user_id).await? else {
        ctx.cache.delete_profile(&account).await?;
        return Ok(());
    };
    let Some(chat) = telegram_chat(&db, user_id).await? else {
        ctx.cache.delete_profile(&account).await?;
        return Ok(());
    };
    let subs = repo::list_by_user(&db, user_id).await?;
    drop(db);
    let profile = build_profile(account, acc.enabled, Some(chat), &subs);
    ctx.cache.put_profile(&profile).await?;
    Ok(())
}

pub async fn after_create(ctx: &Context, sub: &Subscription) -> anyhow::Result<()> {
    let has_binding = {
        let db = ctx.db.get().await?;
        telegram_chat(&db, sub.user_id).await?.is_some()
    };
    if !has_binding {
        // nothing to dispatch to yet; the binding confirm sync picks this up
        return Ok(());
    }
    let account = web_account(sub.user_id);
    ctx.cache.add_board(&sub.board).await?;
    ctx.cache
        .add_subscriber(sub.sub_type, &sub.board, &account)
        .await?;
    rewrite_profile(ctx, sub.user_id).await?;
    tracing::info!(
        %account,
        board = %sub.board,
        kind = %sub.sub_type,
        value = %sub.value,
        "subscription synced to cache"
    );
    Ok(())
}

pub async fn after_update(
    ctx: &Context,
    old: &Subscription,
    updated: &Subscription,
) -> anyhow::Result<()> {
    let account = web_account(updated.user_id);
    let moved = old.board != updated.board || old.sub_type != updated.sub_type;
    if moved {
        let still_needed = {
            let db = ctx.db.get().await?;
            repo::has_other_for_board(&db, old.user_id, &old.board, old.sub_type, old.id).await?
        };
        if !still_needed {
            ctx.cache
                .remove_subscriber(old.sub_type, &old.board, &account)
                .await?;
        }
    }
    after_create(ctx, updated).await
}

pub async fn after_delete(ctx: &Context, sub: &Subscription) -> anyhow::Result<()> {
    let account = web_account(sub.user_id);
    let still_needed = {
        let db = ctx.db.get().await?;
        repo::has_other_for_board(&db, sub.user_id, &sub.board, sub.sub_type, sub.id).await?
    };
    if !still_needed {
        ctx.cache
            .remove_subscriber(sub.sub_type, &sub.board, &account)
            .await?;
    }
    rewrite_profile(ctx, sub.user_id).await?;
    tracing::info!(
        %account,
        board = %sub.board,
        kind = %sub.sub_type,
        "subscription removed from cache"
    );
    Ok(())
}

/// One-time sync after a binding confirm: pushes every existing subscription
/// of the user into the projection.
pub async fn sync_user(ctx: &Context, user_id: i32) -> anyhow::Result<()> {
    let subs = {
        let db = ctx.db.get().await?;
        repo::list_by_user(&db, user_id).await?
    };
    let account = web_account(user_id);
    for sub in subs.iter().filter(|s| s.enabled) {
        ctx.cache.add_board(&sub.board).await?;
        ctx.cache
            .add_subscriber(sub.sub_type, &sub.board, &account)
            .await?;
    }
    rewrite_profile(ctx, user_id).await?;
    tracing::info!(%account, count = subs.len(), "user projection synced");
    Ok(())
}

/// Projects the whole cache from the store. Run at startup or whenever the
/// cache is suspect; ephemeral keys are left alone.
pub async fn rebuild(ctx: &Context) -> anyhow::Result<()> {
    ctx.cache.clear_projection().await?;
    let subs = {
        let db = ctx.db.get().await?;
        repo::list_enabled(&db).await?
    };
    let mut user_ids: Vec<i32> = Vec::new();
    for sub in &subs {
        if !user_ids.contains(&sub.user_id) {
            user_ids.push(sub.user_id);
        }
    }
    for user_id in user_ids {
        if let Err(e) = sync_user(ctx, user_id).await {
            tracing::warn!(user_id, "projection rebuild failed for user: {e:?}");
        }
    }
    tracing::info!(subscriptions = subs.len(), "cache projection rebuilt");
    Ok(())
}
