//! The live monitor: a low-frequency sweep that refreshes board metadata,
//! picks up articles missed during transient failures, and reconciles
//! `push_sum` and the per-tag counts from full page re-fetches. Best-effort,
//! never dispatches.

use tokio::sync::watch;

use crate::db::articles::{self, Article};
use crate::ptt::feed::{self, FeedError};
use crate::ptt::page::{self, PageError};
use crate::Context;

pub(crate) async fn round(ctx: &Context, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
    refresh_boards(ctx, shutdown).await?;
    reconcile_counts(ctx, shutdown).await
}

/// Re-ingests every watched board's feed window so articles lost to
/// transient failures get a second chance.
async fn refresh_boards(ctx: &Context, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
    for board in ctx.cache.boards().await? {
        if *shutdown.borrow() {
            return Ok(());
        }
        let entries = match feed::fetch_board(&ctx.ptt, &board).await {
            Ok(entries) => entries,
            Err(FeedError::BoardNotFound) => {
                ctx.cache.remove_board(&board).await?;
                continue;
            }
            Err(FeedError::Transient(e)) => {
                tracing::debug!(%board, "monitor feed fetch failed: {e:?}");
                continue;
            }
        };
        let refreshed: Vec<Article> = entries
            .iter()
            .map(|entry| Article {
                code: entry.code.clone(),
                id: entry.id,
                title: entry.title.clone(),
                link: entry.link.clone(),
                date: entry.date.clone(),
                author: entry.author.clone(),
                board: board.clone(),
                ..Article::default()
            })
            .collect();
        if refreshed.is_empty() {
            continue;
        }
        // only insert what the new-article poller missed; existing rows keep
        // their enriched fields
        let known = {
            let db = ctx.db.get().await?;
            articles::board_article_codes(&db, &board).await?
        };
        let missed: Vec<Article> = refreshed
            .into_iter()
            .filter(|a| !known.contains(&a.code))
            .filter(|a| !super::new_articles::is_noise_title(&a.title))
            .collect();
        if missed.is_empty() {
            continue;
        }
        let mut db = ctx.db.get().await?;
        articles::save_board_articles(&mut db, &board, &missed).await?;
        tracing::info!(%board, count = missed.len(), "monitor backfilled articles");
    }
    Ok(())
}

/// Full re-fetch of recent articles so stored counts equal the comment list
/// and `push_sum = positive − negative` again after incremental drift.
async fn reconcile_counts(ctx: &Context, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
    let recent = {
        let db = ctx.db.get().await?;
        articles::recent_articles(&db, None).await?
    };
    let mut updated = 0usize;
    for stored in &recent {
        if *shutdown.borrow() {
            return Ok(());
        }
        let mut fetched = match page::fetch_article(&ctx.ptt, &stored.board, &stored.code).await {
            Ok(fetched) => fetched,
            Err(PageError::NotFound) | Err(PageError::Deleted) => continue,
            Err(PageError::Transient(e)) => {
                tracing::debug!(
                    board = %stored.board,
                    code = %stored.code,
                    "monitor page fetch failed: {e:?}"
                );
                continue;
            }
        };
        // keep ingestion-time identity fields
        fetched.id = stored.id;
        fetched.date = stored.date.clone();
        if fetched.author.is_empty() {
            fetched.author = stored.author.clone();
        }
        let mut db = ctx.db.get().await?;
        articles::save_article(&mut db, &fetched).await?;
        updated += 1;
    }
    tracing::info!(total = recent.len(), updated, "monitor reconciled counts");
    Ok(())
}
