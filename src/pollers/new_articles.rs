//! The new-article poller: feed diff, page enrichment, keyword and author
//! matching.

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::watch;

use crate::db::articles::{self, Article};
use crate::db::subscriptions::SubKind;
use crate::dispatcher::{Dispatcher, MatchMessage};
use crate::matching;
use crate::ptt::feed::{self, FeedArticle, FeedError};
use crate::ptt::page::{self, PageError};
use crate::Context;

use super::profile_for;

lazy_static! {
    /// Deleted-article placeholders and board-management noise the feed keeps
    /// listing.
    static ref NOISE_TITLE: Regex =
        Regex::new(r"^(\(本文已被刪除\)|\(已被.+刪除\)|(Fw: )?\[公告\]|\[版務\])").unwrap();
}

pub(crate) fn is_noise_title(title: &str) -> bool {
    NOISE_TITLE.is_match(title.trim())
}

pub(crate) async fn round(
    ctx: &Context,
    dispatcher: &Dispatcher,
    high_traffic: bool,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<()> {
    for board in ctx.cache.boards().await? {
        if *shutdown.borrow() {
            return Ok(());
        }
        if ctx.config.is_high_traffic(&board) != high_traffic {
            continue;
        }
        match check_board(ctx, dispatcher, &board).await {
            Ok(()) => {
                ctx.cache.reset_board_failures(&board).await.ok();
            }
            Err(e) => {
                let consecutive = ctx.cache.incr_board_failures(&board).await.unwrap_or(-1);
                tracing::warn!(%board, consecutive, "board check failed: {e:?}");
            }
        }
    }
    Ok(())
}

async fn check_board(ctx: &Context, dispatcher: &Dispatcher, board: &str) -> anyhow::Result<()> {
    let entries = match feed::fetch_board(&ctx.ptt, board).await {
        Ok(entries) => entries,
        Err(FeedError::BoardNotFound) => {
            tracing::info!(board, "board gone upstream, dropping from rotation");
            ctx.cache.remove_board(board).await?;
            return Ok(());
        }
        Err(FeedError::Transient(e)) => return Err(e),
    };

    let known = {
        let db = ctx.db.get().await?;
        articles::board_article_codes(&db, board).await?
    };
    let fresh: Vec<&FeedArticle> = entries
        .iter()
        .filter(|a| !known.contains(&a.code) && !is_noise_title(&a.title))
        .collect();
    if fresh.is_empty() {
        return Ok(());
    }

    let mut new_articles = Vec::with_capacity(fresh.len());
    for entry in fresh {
        match enrich(ctx, board, entry).await? {
            Some(article) => new_articles.push(article),
            None => continue,
        }
    }
    if new_articles.is_empty() {
        return Ok(());
    }

    {
        let mut db = ctx.db.get().await?;
        articles::save_board_articles(&mut db, board, &new_articles).await?;
    }
    tracing::info!(board, count = new_articles.len(), "new articles ingested");

    notify(ctx, dispatcher, board, &new_articles).await
}

/// Fetches the article page for the author field and initial counts. A
/// transient page failure falls back to the feed data so the article is not
/// lost; a 404 or deleted page drops it.
async fn enrich(
    ctx: &Context,
    board: &str,
    entry: &FeedArticle,
) -> anyhow::Result<Option<Article>> {
    match page::fetch_article(&ctx.ptt, board, &entry.code).await {
        Ok(mut article) => {
            if article.title.is_empty() {
                article.title = entry.title.clone();
            }
            if article.author.is_empty() {
                article.author = entry.author.clone();
            }
            if article.date.is_empty() {
                article.date = entry.date.clone();
            }
            Ok(Some(article))
        }
        Err(PageError::NotFound) | Err(PageError::Deleted) => Ok(None),
        Err(PageError::Transient(e)) => {
            tracing::warn!(board, code = %entry.code, "page enrich failed: {e:?}");
            Ok(Some(Article {
                code: entry.code.clone(),
                id: entry.id,
                title: entry.title.clone(),
                link: entry.link.clone(),
                date: entry.date.clone(),
                author: entry.author.clone(),
                board: board.to_string(),
                ..Article::default()
            }))
        }
    }
}

async fn notify(
    ctx: &Context,
    dispatcher: &Dispatcher,
    board: &str,
    new_articles: &[Article],
) -> anyhow::Result<()> {
    for kind in [SubKind::Keyword, SubKind::Author] {
        for account in ctx.cache.subscribers(kind, board).await? {
            let profile = match profile_for(ctx, &account).await {
                Ok(Some(profile)) => profile,
                Ok(None) => {
                    tracing::debug!(%account, "no profile for subscriber, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%account, "profile load failed: {e:?}");
                    continue;
                }
            };
            let Some(board_subs) = profile.board(board) else {
                continue;
            };
            let messages = match kind {
                SubKind::Keyword => keyword_matches(new_articles, &board_subs.keywords),
                SubKind::Author => author_matches(new_articles, &board_subs.authors),
                _ => unreachable!(),
            };
            for (value, matched) in messages {
                dispatcher.dispatch(MatchMessage {
                    profile: profile.clone(),
                    board: board.to_string(),
                    kind,
                    value,
                    articles: matched,
                });
            }
        }
    }
    Ok(())
}

/// One (value, articles) pair per keyword that matched something, with the
/// subscriber's exclusion keywords filtering the whole set.
pub(crate) fn keyword_matches(
    new_articles: &[Article],
    keywords: &[String],
) -> Vec<(String, Vec<Article>)> {
    let exclusions: Vec<&String> = keywords.iter().filter(|k| k.starts_with('!')).collect();
    let mut out = Vec::new();
    for keyword in keywords.iter().filter(|k| !k.starts_with('!')) {
        let matched: Vec<Article> = new_articles
            .iter()
            .filter(|a| {
                let mut values = vec![keyword.clone()];
                values.extend(exclusions.iter().map(|e| (*e).clone()));
                matching::title_matches_keywords(&a.title, &values)
            })
            .cloned()
            .collect();
        if !matched.is_empty() {
            out.push((keyword.clone(), matched));
        }
    }
    out
}

pub(crate) fn author_matches(
    new_articles: &[Article],
    authors: &[String],
) -> Vec<(String, Vec<Article>)> {
    let mut out = Vec::new();
    for author in authors {
        let matched: Vec<Article> = new_articles
            .iter()
            .filter(|a| matching::author_matches(&a.author, author))
            .cloned()
            .collect();
        if !matched.is_empty() {
            out.push((author.clone(), matched));
        }
    }
    out
}
