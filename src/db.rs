use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
pub use tokio_postgres::Client as DbClient;

pub mod accounts;
pub mod articles;
pub mod bindings;
pub mod stats;
pub mod subscriptions;

/// Upper bound on clients handed out at once; queries past this wait their
/// turn rather than piling connections onto the server.
const MAX_CONCURRENT_CLIENTS: usize = 16;

pub async fn make_client(db_url: &str) -> anyhow::Result<tokio_postgres::Client> {
    let (client, connection) = tokio_postgres::connect(db_url, tokio_postgres::NoTls)
        .await
        .context("failed to connect to DB")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("database connection error: {}", e);
        }
    });
    Ok(client)
}

/// A small pool of Postgres clients shared by pollers, the dispatcher and the
/// HTTP layer. Broken clients are discarded on return.
#[derive(Clone)]
pub struct ClientPool {
    url: String,
    connections: Arc<tokio::sync::Mutex<Vec<tokio_postgres::Client>>>,
    permits: Arc<Semaphore>,
}

pub struct PooledClient {
    client: Option<tokio_postgres::Client>,
    connections: Arc<tokio::sync::Mutex<Vec<tokio_postgres::Client>>>,
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledClient {
    type Target = tokio_postgres::Client;
    fn deref(&self) -> &Self::Target {
        self.client.as_ref().unwrap()
    }
}

impl std::ops::DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client.as_mut().unwrap()
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let client = self.client.take().unwrap();
        if client.is_closed() {
            return;
        }
        let connections = self.connections.clone();
        tokio::spawn(async move {
            connections.lock().await.push(client);
        });
    }
}

impl ClientPool {
    pub fn new(url: String) -> ClientPool {
        ClientPool {
            url,
            connections: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_CLIENTS)),
        }
    }

    pub async fn get(&self) -> anyhow::Result<PooledClient> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("pool semaphore closed")?;
        loop {
            let client = self.connections.lock().await.pop();
            match client {
                Some(client) if client.is_closed() => continue,
                Some(client) => {
                    return Ok(PooledClient {
                        client: Some(client),
                        connections: self.connections.clone(),
                        permit,
                    })
                }
                None => break,
            }
        }
        Ok(PooledClient {
            client: Some(make_client(&self.url).await?),
            connections: self.connections.clone(),
            permit,
        })
    }
}

pub async fn run_migrations(client: &DbClient) -> anyhow::Result<()> {
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS database_versions (
                zero INTEGER PRIMARY KEY,
                migration_counter INTEGER
            );",
            &[],
        )
        .await
        .context("creating database versioning table")?;

    client
        .execute(
            "INSERT INTO database_versions (zero, migration_counter)
        VALUES (0, 0)
        ON CONFLICT DO NOTHING",
            &[],
        )
        .await
        .context("inserting initial database_versions")?;

    let migration_idx: i32 = client
        .query_one("SELECT migration_counter FROM database_versions", &[])
        .await
        .context("getting migration counter")?
        .get(0);
    let migration_idx = migration_idx as usize;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        if idx >= migration_idx {
            client
                .execute(*migration, &[])
                .await
                .with_context(|| format!("executing {}th migration", idx))?;
            client
                .execute(
                    "UPDATE database_versions SET migration_counter = $1",
                    &[&(idx as i32 + 1)],
                )
                .await
                .with_context(|| format!("updating migration counter to {}", idx))?;
        }
    }

    Ok(())
}

static MIGRATIONS: &[&str] = &[
    "
CREATE TABLE boards (
    name TEXT PRIMARY KEY,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
",
    "
CREATE TABLE articles (
    code TEXT PRIMARY KEY,
    id BIGINT NOT NULL DEFAULT 0,
    title TEXT NOT NULL DEFAULT '',
    link TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL DEFAULT '',
    author TEXT NOT NULL DEFAULT '',
    board_name TEXT NOT NULL REFERENCES boards (name) ON DELETE CASCADE,
    push_sum INTEGER NOT NULL DEFAULT 0,
    last_push_datetime TIMESTAMP WITH TIME ZONE,
    positive_count INTEGER NOT NULL DEFAULT 0,
    negative_count INTEGER NOT NULL DEFAULT 0,
    neutral_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
",
    "CREATE INDEX articles_board_name_idx ON articles (board_name);",
    "
CREATE TABLE comments (
    id BIGSERIAL PRIMARY KEY,
    article_code TEXT NOT NULL REFERENCES articles (code) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    user_id TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    datetime TIMESTAMP WITH TIME ZONE
);
",
    "CREATE INDEX comments_article_code_idx ON comments (article_code);",
    "
CREATE TABLE role_limits (
    role TEXT PRIMARY KEY,
    max_subscriptions INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
",
    "
INSERT INTO role_limits (role, max_subscriptions, description) VALUES
    ('admin', -1, 'administrators, unlimited subscriptions'),
    ('vip', 20, 'supporters'),
    ('user', 3, 'regular users')
ON CONFLICT DO NOTHING;
",
    "
CREATE TABLE users (
    id SERIAL PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
",
    "
CREATE TABLE subscriptions (
    id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    board TEXT NOT NULL,
    sub_type TEXT NOT NULL,
    value TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    mail_subject TEXT,
    mail_content TEXT,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, board, sub_type, value)
);
",
    "
CREATE TABLE notification_bindings (
    id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    service TEXT NOT NULL,
    service_id TEXT NOT NULL DEFAULT '',
    bind_code TEXT,
    bind_code_expires_at TIMESTAMP WITH TIME ZONE,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, service)
);
",
    "
CREATE UNIQUE INDEX notification_bindings_service_service_id_key
    ON notification_bindings (service, service_id)
    WHERE service_id <> '';
",
    "
CREATE TABLE subscription_stats (
    id SERIAL PRIMARY KEY,
    board TEXT NOT NULL,
    sub_type TEXT NOT NULL,
    value TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    UNIQUE (board, sub_type, value)
);
",
    "
CREATE TABLE tracked_article_state (
    subscription_id INTEGER PRIMARY KEY REFERENCES subscriptions (id) ON DELETE CASCADE,
    seen_comment_count INTEGER NOT NULL DEFAULT 0,
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
",
];
