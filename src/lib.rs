//! PTT Alertor core: board ingestion, subscription matching and notification
//! dispatch for PTT's Atom feeds and article pages.

pub mod bindings;
pub mod cache;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod errors;
pub mod matching;
pub mod pollers;
pub mod ptt;
pub mod server;
pub mod stats;
pub mod subscriptions;
pub mod sync;
pub mod telegram;

/// Shared handles every long-lived task gets a reference to. The dispatcher
/// is deliberately not in here; it is injected so tests can swap in a
/// recording channel.
pub struct Context {
    pub db: db::ClientPool,
    pub cache: cache::Cache,
    pub ptt: ptt::PttClient,
    pub telegram: telegram::TelegramClient,
    pub config: config::Config,
}
