//! Outbound PTT access: the Atom board feed and article page fetchers.
//!
//! Both go through [`PttClient`], which owns the HTTP client, the courteous
//! user agent and a minimum interval between requests so a burst of new
//! articles never hammers PTT.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub mod feed;
pub mod page;

pub const PTT_BASE: &str = "https://www.ptt.cc";

const USER_AGENT: &str = concat!("ptt-alertor/", env!("CARGO_PKG_VERSION"));
/// Floor between consecutive outbound requests.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

const FEED_TIMEOUT: Duration = Duration::from_secs(10);
const PAGE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct PttClient {
    client: reqwest::Client,
    base: String,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl PttClient {
    pub fn new() -> PttClient {
        Self::with_base(PTT_BASE.to_string())
    }

    /// Used by tests to point the client at a local fixture server.
    pub fn with_base(base: String) -> PttClient {
        PttClient {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("building reqwest client"),
            base,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub(crate) async fn get_feed(&self, board: &str) -> anyhow::Result<reqwest::Response> {
        self.throttle().await;
        self.client
            .get(format!("{}/atom/{}.xml", self.base, board))
            .timeout(FEED_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("fetching feed for board {board}"))
    }

    pub(crate) async fn get_page(&self, board: &str, code: &str) -> anyhow::Result<reqwest::Response> {
        self.throttle().await;
        self.client
            .get(format!("{}/bbs/{}/{}.html", self.base, board, code))
            // PTT gates some boards behind an age check
            .header(reqwest::header::COOKIE, "over18=1")
            .timeout(PAGE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("fetching article {board}/{code}"))
    }

    pub fn article_link(&self, board: &str, code: &str) -> String {
        format!("{}/bbs/{}/{}.html", self.base, board, code)
    }
}

impl Default for PttClient {
    fn default() -> Self {
        Self::new()
    }
}
