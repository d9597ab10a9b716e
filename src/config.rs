//! Process configuration, read once from the environment at startup.

use std::env;

use anyhow::Context as _;

#[derive(Clone, Debug)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,
    /// Redis connection string.
    pub redis_url: String,
    /// Telegram bot token; also the secret path segment of the webhook route.
    pub telegram_token: String,
    /// Public base URL of this deployment, e.g. `https://alertor.example.tw`.
    pub app_host: String,
    /// Shared secret for the external API layer's bearer tokens.
    pub jwt_secret: String,
    /// Boards that get their own (faster) poll cadence.
    pub high_traffic_boards: Vec<String>,
    /// Origins allowed by the CORS middleware. Empty means same-origin only.
    pub cors_allow_origins: Vec<String>,
    /// Symmetric key for the external mail layer's PTT credentials. Unused by
    /// the core; surfaced so the whole process shares one config source.
    pub ptt_cipher_key: Option<String>,
    /// HTTP listen port.
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Ok(Config {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into()),
            telegram_token: required("TELEGRAM_TOKEN")?,
            app_host: env::var("APP_HOST").unwrap_or_else(|_| "http://localhost:9090".into()),
            jwt_secret: required("JWT_SECRET")?,
            high_traffic_boards: list("HIGH_TRAFFIC_BOARDS"),
            cors_allow_origins: list("CORS_ALLOW_ORIGINS"),
            ptt_cipher_key: env::var("PTT_CIPHER_KEY").ok(),
            port: env::var("PORT")
                .ok()
                .map(|p| p.parse::<u16>().context("parsing PORT"))
                .transpose()?
                .unwrap_or(9090),
        })
    }

    pub fn is_high_traffic(&self, board: &str) -> bool {
        self.high_traffic_boards
            .iter()
            .any(|b| b.eq_ignore_ascii_case(board))
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("{name} must be set"))
}

fn list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
