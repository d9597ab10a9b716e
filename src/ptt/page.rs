//! Article page fetching and comment parsing.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use scraper::{Html, Selector};

use crate::db::articles::{Article, Comment, CommentTag};

use super::feed::sequence_id;
use super::PttClient;

/// Marker PTT renders in place of a removed article body.
const DELETED_MARKER: &str = "此文章已被刪除";

#[derive(Debug)]
pub enum PageError {
    /// 404 from upstream.
    NotFound,
    /// The page exists but renders the deleted marker.
    Deleted,
    /// Network or parse trouble; retry next round.
    Transient(anyhow::Error),
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::NotFound => f.write_str("article not found"),
            PageError::Deleted => f.write_str("article was deleted"),
            PageError::Transient(e) => write!(f, "transient page error: {e}"),
        }
    }
}

impl std::error::Error for PageError {}

pub async fn fetch_article(
    client: &PttClient,
    board: &str,
    code: &str,
) -> Result<Article, PageError> {
    let resp = client
        .get_page(board, code)
        .await
        .map_err(PageError::Transient)?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(PageError::NotFound);
    }
    let resp = resp
        .error_for_status()
        .map_err(|e| PageError::Transient(e.into()))?;
    let html = resp
        .text()
        .await
        .map_err(|e| PageError::Transient(e.into()))?;
    if html.contains(DELETED_MARKER) {
        return Err(PageError::Deleted);
    }
    let link = client.article_link(board, code);
    parse_article(&html, board, code, &link).map_err(PageError::Transient)
}

pub(crate) fn parse_article(
    html: &str,
    board: &str,
    code: &str,
    link: &str,
) -> anyhow::Result<Article> {
    let document = Html::parse_document(html);
    let metaline = Selector::parse("div.article-metaline, div.article-metaline-right").unwrap();
    let meta_tag = Selector::parse("span.article-meta-tag").unwrap();
    let meta_value = Selector::parse("span.article-meta-value").unwrap();

    let mut title = String::new();
    let mut author = String::new();
    let mut posted_at: Option<NaiveDateTime> = None;
    for line in document.select(&metaline) {
        let tag = line
            .select(&meta_tag)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_default();
        let value = line
            .select(&meta_value)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_default();
        match tag.trim() {
            "標題" => title = value.trim().to_string(),
            // "alice (Alice)" -> "alice"
            "作者" => author = value.split_whitespace().next().unwrap_or("").to_string(),
            // e.g. "Fri Dec  8 12:18:31 2017"
            "時間" => {
                posted_at = NaiveDateTime::parse_from_str(value.trim(), "%a %b %e %H:%M:%S %Y").ok()
            }
            _ => {}
        }
    }

    if title.is_empty() && author.is_empty() {
        anyhow::bail!("page has no article metadata");
    }

    let push = Selector::parse("div.push").unwrap();
    let push_tag = Selector::parse("span.push-tag").unwrap();
    let push_userid = Selector::parse("span.push-userid").unwrap();
    let push_content = Selector::parse("span.push-content").unwrap();
    let push_datetime = Selector::parse("span.push-ipdatetime").unwrap();

    let mut comments = Vec::new();
    for node in document.select(&push) {
        let glyph = node
            .select(&push_tag)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_default();
        let Some(tag) = CommentTag::from_glyph(&glyph) else {
            continue;
        };
        let user_id = node
            .select(&push_userid)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let content = node
            .select(&push_content)
            .next()
            .map(|t| t.text().collect::<String>())
            .map(|c| c.trim_start_matches(':').trim().to_string())
            .unwrap_or_default();
        let stamp = node
            .select(&push_datetime)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_default();
        comments.push(Comment {
            tag,
            user_id,
            content,
            datetime: parse_comment_datetime(&stamp, posted_at),
        });
    }

    let mut article = Article {
        code: code.to_string(),
        id: sequence_id(code),
        title,
        link: link.to_string(),
        date: posted_at
            .map(|t| t.format("%m/%d").to_string())
            .unwrap_or_default(),
        author,
        board: board.to_string(),
        last_push_datetime: comments.iter().rev().find_map(|c| c.datetime),
        comments,
        ..Article::default()
    };
    article.recount();
    Ok(article)
}

/// Parses a push stamp like "118.166.1.1 12/08 12:20" (the IP part is
/// optional). The year comes from the article's posted date; a comment month
/// earlier than the posting month means the year rolled over.
fn parse_comment_datetime(
    stamp: &str,
    posted_at: Option<NaiveDateTime>,
) -> Option<DateTime<Utc>> {
    let mut parts = stamp.split_whitespace().rev();
    let hm = parts.next()?;
    let md = parts.next()?;
    let (month, day) = md.split_once('/')?;
    let (hour, minute) = hm.split_once(':')?;
    let (month, day): (u32, u32) = (month.parse().ok()?, day.parse().ok()?);
    let (hour, minute): (u32, u32) = (hour.parse().ok()?, minute.parse().ok()?);

    let posted = posted_at?;
    let mut year = posted.year();
    if month < posted.month() {
        year += 1;
    }
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    // PTT timestamps are Taipei time
    let taipei = FixedOffset::east_opt(8 * 3600).unwrap();
    Some(taipei.from_local_datetime(&naive).single()?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body><div id="main-content" class="bbs-screen bbs-content">
<div class="article-metaline"><span class="article-meta-tag">作者</span><span class="article-meta-value">alice (Alice)</span></div>
<div class="article-metaline-right"><span class="article-meta-tag">看板</span><span class="article-meta-value">Gossiping</span></div>
<div class="article-metaline"><span class="article-meta-tag">標題</span><span class="article-meta-value">[問卦] 有沒有八卦</span></div>
<div class="article-metaline"><span class="article-meta-tag">時間</span><span class="article-meta-value">Fri Dec  8 12:18:31 2017</span></div>
本文
<div class="push"><span class="hl push-tag">推 </span><span class="f3 hl push-userid">bob</span><span class="f3 push-content">: 有掛有推</span><span class="push-ipdatetime"> 118.166.1.1 12/08 12:20
</span></div>
<div class="push"><span class="f1 hl push-tag">噓 </span><span class="f3 hl push-userid">carol</span><span class="f3 push-content">: 無聊</span><span class="push-ipdatetime"> 12/08 12:25
</span></div>
<div class="push"><span class="push-tag">→ </span><span class="f3 hl push-userid">dave</span><span class="f3 push-content">: 路過</span><span class="push-ipdatetime"> 01/02 08:00
</span></div>
</div></body></html>"#;

    #[test]
    fn parses_metadata_and_comments() {
        let article = parse_article(
            PAGE,
            "Gossiping",
            "M.1512733113.A.47B",
            "https://www.ptt.cc/bbs/Gossiping/M.1512733113.A.47B.html",
        )
        .unwrap();
        assert_eq!(article.title, "[問卦] 有沒有八卦");
        assert_eq!(article.author, "alice");
        assert_eq!(article.board, "Gossiping");
        assert_eq!(article.id, 1512733113);
        assert_eq!(article.date, "12/08");
        assert_eq!(article.comments.len(), 3);
        assert_eq!(article.positive_count, 1);
        assert_eq!(article.negative_count, 1);
        assert_eq!(article.neutral_count, 1);
        assert_eq!(article.push_sum, 0);
        assert_eq!(article.comments[0].user_id, "bob");
        assert_eq!(article.comments[0].content, "有掛有推");
    }

    #[test]
    fn comment_count_invariant() {
        let article = parse_article(PAGE, "Gossiping", "M.1512733113.A.47B", "x").unwrap();
        assert_eq!(
            (article.positive_count + article.negative_count + article.neutral_count) as usize,
            article.comments.len()
        );
    }

    #[test]
    fn last_push_rolls_year_over() {
        let article = parse_article(PAGE, "Gossiping", "M.1512733113.A.47B", "x").unwrap();
        // third comment is 01/02, after the December article: next year
        let last = article.last_push_datetime.unwrap();
        assert_eq!(last.with_timezone(&FixedOffset::east_opt(8 * 3600).unwrap()).year(), 2018);
    }

    #[test]
    fn no_metadata_is_an_error() {
        assert!(parse_article("<html><body>hi</body></html>", "b", "c", "l").is_err());
    }
}
