//! The comment-tracking poller: diffs tracked articles' comment lists and
//! forwards new comments to their subscribers. Tracked articles that vanish
//! upstream expire their subscription with a goodbye message.

use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::web_account;
use crate::db::articles::{self, Article, Comment};
use crate::db::subscriptions::{self as subs_repo, SubKind, Subscription};
use crate::dispatcher::{Dispatcher, MatchMessage};
use crate::ptt::page::{self, PageError};
use crate::{subscriptions, Context};

use super::profile_for;

pub(crate) async fn round(
    ctx: &Arc<Context>,
    dispatcher: &Dispatcher,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let tracked = {
        let db = ctx.db.get().await?;
        subs_repo::list_by_kind(&db, SubKind::Article).await?
    };
    for sub in tracked {
        if *shutdown.borrow() {
            return Ok(());
        }
        if let Err(e) = check_tracked(ctx, dispatcher, &sub).await {
            tracing::warn!(
                board = %sub.board,
                code = %sub.value,
                "tracked article check failed: {e:?}"
            );
        }
    }
    Ok(())
}

async fn check_tracked(
    ctx: &Arc<Context>,
    dispatcher: &Dispatcher,
    sub: &Subscription,
) -> anyhow::Result<()> {
    let code = sub.value.as_str();
    let article = match page::fetch_article(&ctx.ptt, &sub.board, code).await {
        Ok(article) => article,
        Err(PageError::NotFound) | Err(PageError::Deleted) => {
            return expire(ctx, dispatcher, sub).await;
        }
        Err(PageError::Transient(e)) => return Err(e),
    };

    // the baseline is per subscription: the shared article row is rewritten
    // by the pushsum poller and the monitor, and other trackers of the same
    // code advance it too
    let seen = {
        let db = ctx.db.get().await?;
        subs_repo::seen_comment_count(&db, sub.id).await?
    };
    let live = article.comments.len().min(i32::MAX as usize) as i32;
    let fresh = fresh_comments(seen, &article.comments);

    {
        let mut db = ctx.db.get().await?;
        articles::save_article(&mut db, &article).await?;
        subs_repo::set_seen_comment_count(&db, sub.id, live).await?;
    }

    if fresh.is_empty() {
        return Ok(());
    }
    let Some(profile) = profile_for(ctx, &web_account(sub.user_id)).await? else {
        return Ok(());
    };
    let mut notified = article.clone();
    notified.comments = fresh;
    dispatcher.dispatch(MatchMessage {
        profile,
        board: sub.board.clone(),
        kind: SubKind::Article,
        value: code.to_string(),
        articles: vec![notified],
    });
    Ok(())
}

/// Comments past this subscription's baseline. A missing baseline is the
/// first round: older comments are not news, only seed the state. A baseline
/// above the live count means comments were deleted; rebase silently.
fn fresh_comments(seen: Option<i32>, comments: &[Comment]) -> Vec<Comment> {
    match seen {
        Some(seen) if (seen as usize) < comments.len() => {
            comments.iter().skip(seen as usize).cloned().collect()
        }
        _ => Vec::new(),
    }
}

/// The article is gone; drop the subscription and tell the user why the
/// tracking stopped.
async fn expire(ctx: &Arc<Context>, dispatcher: &Dispatcher, sub: &Subscription) -> anyhow::Result<()> {
    tracing::info!(
        board = %sub.board,
        code = %sub.value,
        user_id = sub.user_id,
        "tracked article gone, expiring subscription"
    );
    subscriptions::delete(ctx, sub.user_id, sub.id).await?;
    if let Some(profile) = profile_for(ctx, &web_account(sub.user_id)).await? {
        dispatcher.dispatch(MatchMessage {
            profile,
            board: sub.board.clone(),
            kind: SubKind::Article,
            value: sub.value.clone(),
            articles: vec![Article {
                code: sub.value.clone(),
                title: "追蹤的文章已消失，已自動取消追蹤".to_string(),
                link: ctx.ptt.article_link(&sub.board, &sub.value),
                board: sub.board.clone(),
                ..Article::default()
            }],
        });
    }
    Ok(())
}
