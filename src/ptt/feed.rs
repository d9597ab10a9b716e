//! Board feed fetching and parsing.
//!
//! PTT exposes `https://www.ptt.cc/atom/<board>.xml` with the board's most
//! recent articles. The fetcher returns lightweight descriptors oldest-first;
//! entries it cannot make sense of are dropped one by one rather than failing
//! the feed.

use std::fmt;

use crate::cache::Cache;

use super::PttClient;

#[derive(Debug)]
pub enum FeedError {
    /// Upstream answered 404: the board does not exist (or was renamed).
    BoardNotFound,
    /// Network or parse trouble; retry next round.
    Transient(anyhow::Error),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::BoardNotFound => f.write_str("board not found"),
            FeedError::Transient(e) => write!(f, "transient feed error: {e}"),
        }
    }
}

impl std::error::Error for FeedError {}

/// One feed entry, before page enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedArticle {
    pub code: String,
    pub id: i64,
    pub title: String,
    pub link: String,
    pub author: String,
    pub date: String,
}

/// Extracts the article code from a PTT article URL.
pub fn code_from_link(link: &str) -> Option<String> {
    let file = link.trim_end_matches('/').rsplit('/').next()?;
    let code = file.strip_suffix(".html").unwrap_or(file);
    if code.starts_with("M.") {
        Some(code.to_string())
    } else {
        None
    }
}

/// Board-local sequence derived from the code's epoch field
/// (`M.<epoch>.A.<suffix>`), monotone in posting order.
pub fn sequence_id(code: &str) -> i64 {
    code.split('.').nth(1).and_then(|s| s.parse().ok()).unwrap_or(0)
}

pub async fn fetch_board(client: &PttClient, board: &str) -> Result<Vec<FeedArticle>, FeedError> {
    let resp = client.get_feed(board).await.map_err(FeedError::Transient)?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(FeedError::BoardNotFound);
    }
    let resp = resp
        .error_for_status()
        .map_err(|e| FeedError::Transient(e.into()))?;
    let body = resp
        .bytes()
        .await
        .map_err(|e| FeedError::Transient(e.into()))?;
    parse_feed(&body).map_err(FeedError::Transient)
}

pub(crate) fn parse_feed(xml: &[u8]) -> anyhow::Result<Vec<FeedArticle>> {
    let feed = feed_rs::parser::parse(xml)?;
    let mut articles = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
            tracing::debug!("feed entry without link, dropping");
            continue;
        };
        let Some(code) = code_from_link(&link) else {
            tracing::debug!(%link, "feed entry link without article code, dropping");
            continue;
        };
        let title = match entry.title {
            Some(t) if !t.content.is_empty() => t.content,
            _ => {
                tracing::debug!(%code, "feed entry without title, dropping");
                continue;
            }
        };
        let author = entry
            .authors
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_default();
        let date = entry
            .published
            .or(entry.updated)
            .map(|d| d.format("%m/%d").to_string())
            .unwrap_or_default();
        articles.push(FeedArticle {
            id: sequence_id(&code),
            link,
            code,
            title,
            author,
            date,
        });
    }
    // the feed is newest-first; callers want posting order
    articles.reverse();
    Ok(articles)
}

/// Whether the board exists upstream, with the answer cached for a day so
/// user-facing validation does not hit PTT on every keystroke.
pub async fn board_exists(
    client: &PttClient,
    cache: &Cache,
    board: &str,
) -> anyhow::Result<bool> {
    if let Some(cached) = cache.board_exists(board).await? {
        return Ok(cached);
    }
    let exists = match fetch_board(client, board).await {
        Ok(_) => true,
        Err(FeedError::BoardNotFound) => false,
        Err(FeedError::Transient(e)) => return Err(e),
    };
    cache.set_board_exists(board, exists).await?;
    Ok(exists)
}
