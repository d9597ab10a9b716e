//! Redis-backed hot cache.
//!
//! Everything in here is a rebuildable projection of the durable store plus a
//! few ephemeral keys (bind flags, webhook dedup, one-shot pushsum state).
//! Namespaces:
//!
//! - `boards` — set of boards any subscriber cares about
//! - `<kind>:<board>:subs` — subscriber account sets
//! - `user:<account>` — JSON profile with denormalized subscriptions
//! - `alerts:sent` — monotonic alert counter
//! - `board-exist:<board>` — TTL'd existence probe result
//! - `telegram:waiting-email:<chat>` — TTL'd enrollment flag
//! - `telegram:update:<id>` — TTL'd webhook dedup marker
//! - `pushsum:alerted:<code>` — accounts already notified for the article
//! - `poller:failures:<board>` — consecutive poll failures

use anyhow::Context as _;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::db::subscriptions::SubKind;

const BOARD_EXIST_TTL_SECS: u64 = 60 * 60 * 24;
const WAITING_EMAIL_TTL_SECS: u64 = 300;
const UPDATE_DEDUP_TTL_SECS: u64 = 60 * 60 * 24;

/// Prefix for subscriber accounts that came through the web registration.
pub const WEB_ACCOUNT_PREFIX: &str = "web_";

pub fn web_account(user_id: i32) -> String {
    format!("{WEB_ACCOUNT_PREFIX}{user_id}")
}

/// Parses a `web_<id>` account back into the user id.
pub fn user_id_of_account(account: &str) -> Option<i32> {
    account.strip_prefix(WEB_ACCOUNT_PREFIX)?.parse().ok()
}

/// Pushsum thresholds; `up` alerts at `push_sum >= up`, `down` (negative)
/// alerts at `push_sum <= down`. Zero means "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PushThresholds {
    pub up: i32,
    pub down: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardSubs {
    pub board: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub push_sum: PushThresholds,
}

/// The dispatch-time view of one subscriber.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub account: String,
    pub enabled: bool,
    pub telegram_chat: Option<i64>,
    #[serde(default)]
    pub subscribes: Vec<BoardSubs>,
}

impl UserProfile {
    pub fn board(&self, name: &str) -> Option<&BoardSubs> {
        self.subscribes
            .iter()
            .find(|s| s.board.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

fn subs_key(kind: SubKind, board: &str) -> String {
    format!("{}:{}:subs", kind.as_str(), board)
}

fn profile_key(account: &str) -> String {
    format!("user:{account}")
}

impl Cache {
    pub async fn connect(url: &str) -> anyhow::Result<Cache> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("connecting to redis")?;
        Ok(Cache { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // --- board membership -------------------------------------------------

    pub async fn boards(&self) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.smembers("boards").await?)
    }

    pub async fn add_board(&self, board: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>("boards", board).await?;
        Ok(())
    }

    pub async fn remove_board(&self, board: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.srem::<_, _, ()>("boards", board).await?;
        Ok(())
    }

    // --- subscriber sets --------------------------------------------------

    pub async fn add_subscriber(
        &self,
        kind: SubKind,
        board: &str,
        account: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>(subs_key(kind, board), account).await?;
        Ok(())
    }

    pub async fn remove_subscriber(
        &self,
        kind: SubKind,
        board: &str,
        account: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.srem::<_, _, ()>(subs_key(kind, board), account).await?;
        Ok(())
    }

    pub async fn subscribers(&self, kind: SubKind, board: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.smembers(subs_key(kind, board)).await?)
    }

    pub async fn has_subscribers(&self, kind: SubKind, board: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn();
        let n: i64 = conn.scard(subs_key(kind, board)).await?;
        Ok(n > 0)
    }

    // --- profiles ---------------------------------------------------------

    pub async fn put_profile(&self, profile: &UserProfile) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let json = serde_json::to_string(profile).context("serializing profile")?;
        conn.set::<_, _, ()>(profile_key(&profile.account), json)
            .await?;
        Ok(())
    }

    pub async fn profile(&self, account: &str) -> anyhow::Result<Option<UserProfile>> {
        let mut conn = self.conn();
        let json: Option<String> = conn.get(profile_key(account)).await?;
        match json {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("deserializing profile")?,
            )),
            None => Ok(None),
        }
    }

    pub async fn delete_profile(&self, account: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(profile_key(account)).await?;
        Ok(())
    }

    // --- counters ---------------------------------------------------------

    pub async fn incr_alerts(&self) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.incr::<_, _, ()>("alerts:sent", 1).await?;
        Ok(())
    }

    pub async fn alerts_sent(&self) -> anyhow::Result<i64> {
        let mut conn = self.conn();
        let n: Option<i64> = conn.get("alerts:sent").await?;
        Ok(n.unwrap_or(0))
    }

    pub async fn incr_board_failures(&self, board: &str) -> anyhow::Result<i64> {
        let mut conn = self.conn();
        Ok(conn.incr(format!("poller:failures:{board}"), 1).await?)
    }

    pub async fn reset_board_failures(&self, board: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(format!("poller:failures:{board}")).await?;
        Ok(())
    }

    // --- ephemeral keys ---------------------------------------------------

    pub async fn set_board_exists(&self, board: &str, exists: bool) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(
            format!("board-exist:{board}"),
            if exists { "1" } else { "0" },
            BOARD_EXIST_TTL_SECS,
        )
        .await?;
        Ok(())
    }

    pub async fn board_exists(&self, board: &str) -> anyhow::Result<Option<bool>> {
        let mut conn = self.conn();
        let v: Option<String> = conn.get(format!("board-exist:{board}")).await?;
        Ok(v.map(|v| v == "1"))
    }

    pub async fn set_waiting_email(&self, chat_id: i64) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(
            format!("telegram:waiting-email:{chat_id}"),
            "1",
            WAITING_EMAIL_TTL_SECS,
        )
        .await?;
        Ok(())
    }

    /// Consumes the waiting-email flag, returning whether it was set.
    pub async fn take_waiting_email(&self, chat_id: i64) -> anyhow::Result<bool> {
        let mut conn = self.conn();
        let n: i64 = conn.del(format!("telegram:waiting-email:{chat_id}")).await?;
        Ok(n > 0)
    }

    /// Records a webhook update id; returns false when it was seen already,
    /// so redeliveries become no-ops.
    pub async fn mark_update_handled(&self, update_id: i64) -> anyhow::Result<bool> {
        let mut conn = self.conn();
        let set: Option<String> = redis::cmd("SET")
            .arg(format!("telegram:update:{update_id}"))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(UPDATE_DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    /// Forgets a recorded update id so the platform's redelivery is
    /// processed instead of dropped; used when handling fails transiently.
    pub async fn clear_update_mark(&self, update_id: i64) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(format!("telegram:update:{update_id}")).await?;
        Ok(())
    }

    // --- pushsum one-shot state -------------------------------------------

    /// Returns true the first time an account is marked for an article.
    pub async fn pushsum_mark_alerted(&self, code: &str, account: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(format!("pushsum:alerted:{code}"), account).await?;
        Ok(added > 0)
    }

    pub async fn pushsum_clear(&self, code: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(format!("pushsum:alerted:{code}")).await?;
        Ok(())
    }

    pub async fn pushsum_alerted_codes(&self) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn();
        let keys: Vec<String> = conn.keys("pushsum:alerted:*").await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix("pushsum:alerted:").map(String::from))
            .collect())
    }

    // --- projection rebuild ----------------------------------------------

    /// Drops every projected key (board set, subscriber sets, profiles) so a
    /// rebuild starts from a clean slate. Ephemeral keys survive.
    pub async fn clear_projection(&self) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let mut keys: Vec<String> = Vec::new();
        for pattern in ["user:*", "*:subs"] {
            let mut found: Vec<String> = conn.keys(pattern).await?;
            keys.append(&mut found);
        }
        keys.push("boards".to_string());
        for key in keys {
            conn.del::<_, ()>(key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_round_trip() {
        assert_eq!(web_account(42), "web_42");
        assert_eq!(user_id_of_account("web_42"), Some(42));
        assert_eq!(user_id_of_account("tg_42"), None);
        assert_eq!(user_id_of_account("web_x"), None);
    }

    #[test]
    fn profile_board_lookup_is_case_insensitive() {
        let profile = UserProfile {
            account: "web_1".into(),
            enabled: true,
            telegram_chat: Some(99),
            subscribes: vec![BoardSubs {
                board: "Gossiping".into(),
                keywords: vec!["問卦".into()],
                ..BoardSubs::default()
            }],
        };
        assert!(profile.board("gossiping").is_some());
        assert!(profile.board("movie").is_none());
    }

    #[test]
    fn profile_json_round_trip() {
        let profile = UserProfile {
            account: "web_7".into(),
            enabled: true,
            telegram_chat: Some(1234),
            subscribes: vec![BoardSubs {
                board: "Stock".into(),
                keywords: vec!["台積&股價".into()],
                authors: vec!["somebody".into()],
                push_sum: PushThresholds { up: 50, down: -20 },
            }],
        };
        let json = serde_json::to_string(&profile).unwrap();
        let back: UserProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }
}
