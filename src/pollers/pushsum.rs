//! The push-count poller: re-fetches comment pages for boards with pushsum
//! subscribers and alerts each subscriber once per article per threshold
//! crossing.

use std::collections::{HashMap, HashSet};

use tokio::sync::watch;

use crate::cache::UserProfile;
use crate::db::articles::{self, Article};
use crate::db::subscriptions::SubKind;
use crate::dispatcher::{Dispatcher, MatchMessage};
use crate::matching;
use crate::ptt::feed::{self, FeedError};
use crate::ptt::page::{self, PageError};
use crate::Context;

use super::profile_for;

pub(crate) async fn round(
    ctx: &Context,
    dispatcher: &Dispatcher,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<()> {
    // union of feed windows this round, for aging out one-shot state
    let mut window: HashSet<String> = HashSet::new();
    let mut polled_any = false;
    let mut all_ok = true;

    for board in ctx.cache.boards().await? {
        if *shutdown.borrow() {
            return Ok(());
        }
        if !ctx.cache.has_subscribers(SubKind::Pushsum, &board).await? {
            continue;
        }
        polled_any = true;
        match check_board(ctx, dispatcher, &board, &mut window).await {
            Ok(()) => {
                ctx.cache.reset_board_failures(&board).await.ok();
            }
            Err(e) => {
                all_ok = false;
                let consecutive = ctx.cache.incr_board_failures(&board).await.unwrap_or(-1);
                tracing::warn!(%board, consecutive, "pushsum check failed: {e:?}");
            }
        }
    }

    // a failed board's window is unknown; keep state rather than re-alert
    if polled_any && all_ok {
        clear_aged_state(ctx, &window).await?;
    }
    Ok(())
}

async fn check_board(
    ctx: &Context,
    dispatcher: &Dispatcher,
    board: &str,
    window: &mut HashSet<String>,
) -> anyhow::Result<()> {
    let entries = match feed::fetch_board(&ctx.ptt, board).await {
        Ok(entries) => entries,
        Err(FeedError::BoardNotFound) => {
            ctx.cache.remove_board(board).await?;
            return Ok(());
        }
        Err(FeedError::Transient(e)) => return Err(e),
    };
    window.extend(entries.iter().map(|a| a.code.clone()));

    // positive and negative crossings per subscriber, one message each
    let mut ups: HashMap<String, (UserProfile, i32, Vec<Article>)> = HashMap::new();
    let mut downs: HashMap<String, (UserProfile, i32, Vec<Article>)> = HashMap::new();

    let subscribers = ctx.cache.subscribers(SubKind::Pushsum, board).await?;
    if subscribers.is_empty() {
        return Ok(());
    }

    for entry in &entries {
        let mut article = match page::fetch_article(&ctx.ptt, board, &entry.code).await {
            Ok(article) => article,
            Err(PageError::NotFound) | Err(PageError::Deleted) => {
                ctx.cache.pushsum_clear(&entry.code).await?;
                continue;
            }
            Err(PageError::Transient(e)) => {
                tracing::warn!(board, code = %entry.code, "pushsum fetch failed: {e:?}");
                continue;
            }
        };
        if article.author.is_empty() {
            article.author = entry.author.clone();
        }
        {
            let mut db = ctx.db.get().await?;
            articles::save_article(&mut db, &article).await?;
        }

        for account in &subscribers {
            let profile = match profile_for(ctx, account).await {
                Ok(Some(profile)) => profile,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(%account, "profile load failed: {e:?}");
                    continue;
                }
            };
            let Some(thresholds) = profile.board(board).map(|b| b.push_sum) else {
                continue;
            };
            if !matching::pushsum_reaches(article.push_sum, thresholds) {
                continue;
            }
            // one alert per (article, subscriber), ever
            if !ctx.cache.pushsum_mark_alerted(&article.code, account).await? {
                continue;
            }
            let bucket = if article.push_sum > 0 {
                ups.entry(account.clone())
                    .or_insert_with(|| (profile, thresholds.up, Vec::new()))
            } else {
                downs
                    .entry(account.clone())
                    .or_insert_with(|| (profile, thresholds.down, Vec::new()))
            };
            bucket.2.push(article.clone());
        }
    }

    for (_, (profile, threshold, matched)) in ups.into_iter().chain(downs) {
        dispatcher.dispatch(MatchMessage {
            profile,
            board: board.to_string(),
            kind: SubKind::Pushsum,
            value: threshold.to_string(),
            articles: matched,
        });
    }
    Ok(())
}

/// Drops one-shot state for articles that left every feed window. Codes whose
/// article is still inside a window polled this round are kept.
async fn clear_aged_state(ctx: &Context, window: &HashSet<String>) -> anyhow::Result<()> {
    for code in ctx.cache.pushsum_alerted_codes().await? {
        if !window.contains(&code) {
            ctx.cache.pushsum_clear(&code).await?;
        }
    }
    Ok(())
}
