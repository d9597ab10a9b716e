//! The dispatch pipeline: a process-wide channel of match messages drained by
//! a fixed pool of workers sending through the chat client.
//!
//! The dispatcher is constructed once and injected into every poller, so
//! tests can swap in [`Dispatcher::channel`] and assert on the recorded
//! messages instead of a live chat service.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Duration;

use crate::cache::{Cache, UserProfile};
use crate::db::articles::Article;
use crate::db::subscriptions::SubKind;
use crate::telegram::TelegramClient;

pub const WORKERS: usize = 300;

/// How long workers keep draining the queue after shutdown is signalled.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// One subscriber's match result for one (board, kind, value) in one round.
#[derive(Debug, Clone)]
pub struct MatchMessage {
    pub profile: UserProfile,
    pub board: String,
    pub kind: SubKind,
    pub value: String,
    pub articles: Vec<Article>,
}

impl MatchMessage {
    /// Renders the outbound notification text.
    pub fn render(&self) -> String {
        let mut text = match self.kind {
            SubKind::Keyword => format!("{} 板有新 {} 文章", self.board, self.value),
            SubKind::Author => format!("{} 大大在 {} 板有新文章", self.value, self.board),
            SubKind::Pushsum => format!("{} 板有文章推文數達 {}", self.board, self.value),
            SubKind::Article => format!("{} 板追蹤文章有新推文", self.board),
        };
        let numbered = self.articles.len() > 1;
        for (i, article) in self.articles.iter().enumerate() {
            text.push_str("\n\n");
            if numbered {
                text.push_str(&format!("#{}\n", i + 1));
            }
            text.push_str(&article.title);
            if self.kind == SubKind::Pushsum {
                text.push_str(&format!(" ({:+})", article.push_sum));
            }
            text.push('\n');
            text.push_str(&article.link);
            if self.kind == SubKind::Article {
                for comment in &article.comments {
                    text.push_str(&format!(
                        "\n{} {}: {}",
                        comment.tag.as_str(),
                        comment.user_id,
                        comment.content
                    ));
                }
            }
        }
        text
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<MatchMessage>,
}

impl Dispatcher {
    /// Starts the worker pool and returns the handle pollers enqueue into.
    pub fn spawn(
        telegram: TelegramClient,
        cache: Cache,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Dispatcher {
        let (dispatcher, rx) = Self::channel();
        let rx = Arc::new(Mutex::new(rx));
        for id in 0..workers {
            let rx = rx.clone();
            let telegram = telegram.clone();
            let cache = cache.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(worker(id, rx, telegram, cache, shutdown));
        }
        dispatcher
    }

    /// A dispatcher whose messages land in the returned receiver; the test
    /// double for [`Dispatcher::spawn`].
    pub fn channel() -> (Dispatcher, mpsc::UnboundedReceiver<MatchMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Dispatcher { tx }, rx)
    }

    pub fn dispatch(&self, msg: MatchMessage) {
        if self.tx.send(msg).is_err() {
            tracing::error!("dispatcher channel closed, message dropped");
        }
    }
}

enum Next {
    Msg(Option<MatchMessage>),
    Recheck,
}

async fn worker(
    id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<MatchMessage>>>,
    telegram: TelegramClient,
    cache: Cache,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let stopping = *shutdown.borrow();
        let next = {
            let mut guard = rx.lock().await;
            if stopping {
                match tokio::time::timeout(DRAIN_GRACE, guard.recv()).await {
                    Ok(msg) => Next::Msg(msg),
                    Err(_) => Next::Msg(None),
                }
            } else {
                tokio::select! {
                    msg = guard.recv() => Next::Msg(msg),
                    _ = shutdown.changed() => Next::Recheck,
                }
            }
        };
        let msg = match next {
            Next::Recheck => continue,
            Next::Msg(None) => break,
            Next::Msg(Some(msg)) => msg,
        };

        // a panicking send must not take the worker down with it
        let telegram = telegram.clone();
        let cache = cache.clone();
        let handle = tokio::spawn(deliver(msg, telegram, cache));
        if let Err(e) = handle.await {
            if e.is_panic() {
                tracing::error!(worker = id, "send panicked: {e}");
            }
        }
    }
    tracing::debug!(worker = id, "dispatch worker exiting");
}

async fn deliver(msg: MatchMessage, telegram: TelegramClient, cache: Cache) {
    let account = &msg.profile.account;
    let Some(chat_id) = msg.profile.telegram_chat.filter(|_| msg.profile.enabled) else {
        tracing::warn!(
            %account,
            board = %msg.board,
            kind = %msg.kind,
            "message dropped: no enabled telegram binding"
        );
        return;
    };

    match telegram.send_text(chat_id, &msg.render()).await {
        Ok(()) => {
            if let Err(e) = cache.incr_alerts().await {
                tracing::warn!("alert counter increment failed: {e}");
            }
            tracing::info!(
                %account,
                platform = "telegram",
                board = %msg.board,
                kind = %msg.kind,
                value = %msg.value,
                "message sent"
            );
        }
        Err(e) => {
            tracing::warn!(
                %account,
                board = %msg.board,
                kind = %msg.kind,
                "send failed: {e:?}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::articles::{Comment, CommentTag};

    fn article(title: &str, link: &str) -> Article {
        Article {
            title: title.to_string(),
            link: link.to_string(),
            ..Article::default()
        }
    }

    #[test]
    fn single_article_is_unnumbered() {
        let msg = MatchMessage {
            profile: UserProfile::default(),
            board: "Gossiping".into(),
            kind: SubKind::Keyword,
            value: "問卦".into(),
            articles: vec![article("[問卦] 測試", "https://x/1")],
        };
        let text = msg.render();
        assert!(text.starts_with("Gossiping 板有新 問卦 文章"));
        assert!(text.contains("[問卦] 測試"));
        assert!(!text.contains("#1"));
    }

    #[test]
    fn multiple_articles_are_numbered() {
        let msg = MatchMessage {
            profile: UserProfile::default(),
            board: "movie".into(),
            kind: SubKind::Author,
            value: "alice".into(),
            articles: vec![article("A", "https://x/1"), article("B", "https://x/2")],
        };
        let text = msg.render();
        assert!(text.contains("#1\nA"));
        assert!(text.contains("#2\nB"));
    }

    #[test]
    fn article_kind_appends_new_comments() {
        let mut a = article("追蹤中", "https://x/3");
        a.comments = vec![Comment {
            tag: CommentTag::Positive,
            user_id: "bob".into(),
            content: "推".into(),
            datetime: None,
        }];
        let msg = MatchMessage {
            profile: UserProfile::default(),
            board: "Stock".into(),
            kind: SubKind::Article,
            value: a.code.clone(),
            articles: vec![a],
        };
        assert!(msg.render().contains("推 bob: 推"));
    }

    #[tokio::test]
    async fn channel_fake_records_messages() {
        let (dispatcher, mut rx) = Dispatcher::channel();
        dispatcher.dispatch(MatchMessage {
            profile: UserProfile::default(),
            board: "b".into(),
            kind: SubKind::Keyword,
            value: "v".into(),
            articles: vec![],
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.board, "b");
    }
}
