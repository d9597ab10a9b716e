//! Boards, articles and their comment lists.
//!
//! Articles are keyed by PTT's globally unique article code. Saving an
//! article replaces its whole comment list; reconciling individual comment
//! rows is not worth the complexity for lists this small.

use std::collections::HashSet;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Client as DbClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentTag {
    Positive,
    Negative,
    Neutral,
}

impl CommentTag {
    /// Classifies PTT's push glyph: 推 / 噓 / →.
    pub fn from_glyph(glyph: &str) -> Option<CommentTag> {
        match glyph.trim() {
            "推" => Some(CommentTag::Positive),
            "噓" => Some(CommentTag::Negative),
            "→" => Some(CommentTag::Neutral),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommentTag::Positive => "推",
            CommentTag::Negative => "噓",
            CommentTag::Neutral => "→",
        }
    }

    fn from_str(s: &str) -> CommentTag {
        match s {
            "推" => CommentTag::Positive,
            "噓" => CommentTag::Negative,
            _ => CommentTag::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub tag: CommentTag,
    pub user_id: String,
    pub content: String,
    pub datetime: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    pub code: String,
    /// Board-local sequence number derived from the code's epoch field.
    pub id: i64,
    pub title: String,
    pub link: String,
    /// Posted-date string as PTT renders it, e.g. "12/08".
    pub date: String,
    pub author: String,
    pub board: String,
    pub push_sum: i32,
    pub last_push_datetime: Option<DateTime<Utc>>,
    pub positive_count: i32,
    pub negative_count: i32,
    pub neutral_count: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

impl Article {
    /// Recomputes the per-tag counts and push sum from the comment list.
    pub fn recount(&mut self) {
        let (mut pos, mut neg, mut neu) = (0, 0, 0);
        for c in &self.comments {
            match c.tag {
                CommentTag::Positive => pos += 1,
                CommentTag::Negative => neg += 1,
                CommentTag::Neutral => neu += 1,
            }
        }
        self.positive_count = pos;
        self.negative_count = neg;
        self.neutral_count = neu;
        self.push_sum = pos - neg;
    }
}

const ARTICLE_COLUMNS: &str = "code, id, title, link, date, author, board_name, push_sum,
       last_push_datetime, positive_count, negative_count, neutral_count";

fn article_from_row(row: &tokio_postgres::Row) -> Article {
    Article {
        code: row.get(0),
        id: row.get(1),
        title: row.get(2),
        link: row.get(3),
        date: row.get(4),
        author: row.get(5),
        board: row.get(6),
        push_sum: row.get(7),
        last_push_datetime: row.get(8),
        positive_count: row.get(9),
        negative_count: row.get(10),
        neutral_count: row.get(11),
        comments: Vec::new(),
    }
}

pub async fn list_boards(db: &DbClient) -> anyhow::Result<Vec<String>> {
    let rows = db
        .query("SELECT name FROM boards ORDER BY name", &[])
        .await
        .context("listing boards")?;
    Ok(rows.into_iter().map(|r| r.get(0)).collect())
}

pub async fn board_articles(db: &DbClient, board: &str) -> anyhow::Result<Vec<Article>> {
    let rows = db
        .query(
            &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE board_name = $1 ORDER BY id DESC"),
            &[&board],
        )
        .await
        .context("querying board articles")?;
    Ok(rows.iter().map(article_from_row).collect())
}

pub async fn board_article_codes(db: &DbClient, board: &str) -> anyhow::Result<HashSet<String>> {
    let rows = db
        .query("SELECT code FROM articles WHERE board_name = $1", &[&board])
        .await
        .context("querying board article codes")?;
    Ok(rows.into_iter().map(|r| r.get(0)).collect())
}

pub async fn find_article(db: &DbClient, code: &str) -> anyhow::Result<Option<Article>> {
    let row = db
        .query_opt(
            &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE code = $1"),
            &[&code],
        )
        .await
        .context("querying article")?;
    let Some(row) = row else { return Ok(None) };
    let mut article = article_from_row(&row);

    let comments = db
        .query(
            "SELECT tag, user_id, content, datetime
             FROM comments WHERE article_code = $1 ORDER BY id",
            &[&code],
        )
        .await
        .context("querying article comments")?;
    for c in comments {
        let tag: String = c.get(0);
        article.comments.push(Comment {
            tag: CommentTag::from_str(&tag),
            user_id: c.get(1),
            content: c.get(2),
            datetime: c.get(3),
        });
    }
    Ok(Some(article))
}

/// Articles first seen within the last day, for count reconciliation.
pub async fn recent_articles(db: &DbClient, board: Option<&str>) -> anyhow::Result<Vec<Article>> {
    let rows = match board {
        Some(board) => {
            db.query(
                &format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles
                     WHERE board_name = $1 AND created_at > NOW() - INTERVAL '1 day'
                     ORDER BY created_at DESC"
                ),
                &[&board],
            )
            .await
        }
        None => {
            db.query(
                &format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles
                     WHERE created_at > NOW() - INTERVAL '1 day'
                     ORDER BY created_at DESC"
                ),
                &[],
            )
            .await
        }
    }
    .context("querying recent articles")?;
    Ok(rows.iter().map(article_from_row).collect())
}

/// Upserts the board row and every article in one transaction. Comments are
/// untouched; use [`save_article`] for the full replace-set write.
pub async fn save_board_articles(
    db: &mut DbClient,
    board: &str,
    articles: &[Article],
) -> anyhow::Result<()> {
    let tx = db.transaction().await.context("begin transaction")?;
    tx.execute(
        "INSERT INTO boards (name) VALUES ($1)
         ON CONFLICT (name) DO UPDATE SET updated_at = NOW()",
        &[&board],
    )
    .await
    .context("upserting board")?;
    for a in articles {
        upsert_article(&tx, a, board).await?;
    }
    tx.commit().await.context("commit board articles")?;
    Ok(())
}

/// Upserts board and article, then replaces the article's comment list.
pub async fn save_article(db: &mut DbClient, article: &Article) -> anyhow::Result<()> {
    let tx = db.transaction().await.context("begin transaction")?;
    tx.execute(
        "INSERT INTO boards (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
        &[&article.board],
    )
    .await
    .context("upserting board")?;
    upsert_article(&tx, article, &article.board).await?;
    tx.execute(
        "DELETE FROM comments WHERE article_code = $1",
        &[&article.code],
    )
    .await
    .context("deleting old comments")?;
    for c in &article.comments {
        tx.execute(
            "INSERT INTO comments (article_code, tag, user_id, content, datetime)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &article.code,
                &c.tag.as_str(),
                &c.user_id,
                &c.content,
                &c.datetime,
            ],
        )
        .await
        .context("inserting comment")?;
    }
    tx.commit().await.context("commit article")?;
    Ok(())
}

async fn upsert_article(
    tx: &tokio_postgres::Transaction<'_>,
    a: &Article,
    board: &str,
) -> anyhow::Result<()> {
    tx.execute(
        "INSERT INTO articles (code, id, title, link, date, author, board_name, push_sum,
                               last_push_datetime, positive_count, negative_count, neutral_count)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (code) DO UPDATE SET
             id = EXCLUDED.id,
             title = EXCLUDED.title,
             link = EXCLUDED.link,
             date = EXCLUDED.date,
             author = EXCLUDED.author,
             push_sum = EXCLUDED.push_sum,
             last_push_datetime = EXCLUDED.last_push_datetime,
             positive_count = EXCLUDED.positive_count,
             negative_count = EXCLUDED.negative_count,
             neutral_count = EXCLUDED.neutral_count,
             updated_at = NOW()",
        &[
            &a.code,
            &a.id,
            &a.title,
            &a.link,
            &a.date,
            &a.author,
            &board,
            &a.push_sum,
            &a.last_push_datetime,
            &a.positive_count,
            &a.negative_count,
            &a.neutral_count,
        ],
    )
    .await
    .with_context(|| format!("upserting article {}", a.code))?;
    Ok(())
}

pub async fn delete_article(db: &DbClient, code: &str) -> anyhow::Result<()> {
    db.execute("DELETE FROM articles WHERE code = $1", &[&code])
        .await
        .context("deleting article")?;
    Ok(())
}
