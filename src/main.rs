use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::watch;

use ptt_alertor::config::Config;
use ptt_alertor::dispatcher::{Dispatcher, WORKERS};
use ptt_alertor::telegram::TelegramClient;
use ptt_alertor::{cache, db, pollers, ptt, server, sync, Context};

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let pool = db::ClientPool::new(config.database_url.clone());
    db::run_migrations(&*pool.get().await?)
        .await
        .context("database migrations")?;

    let cache = cache::Cache::connect(&config.redis_url)
        .await
        .context("cache connection")?;

    let ctx = Arc::new(Context {
        db: pool,
        cache,
        ptt: ptt::PttClient::new(),
        telegram: TelegramClient::new(config.telegram_token.clone()),
        config: config.clone(),
    });

    // the cache is a projection; reconcile it before the pollers read it
    sync::rebuild(&ctx)
        .await
        .context("startup cache rebuild")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let dispatcher = Dispatcher::spawn(
        ctx.telegram.clone(),
        ctx.cache.clone(),
        WORKERS,
        shutdown_rx.clone(),
    );
    pollers::spawn_all(ctx.clone(), dispatcher, shutdown_rx.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("listening on http://{addr}");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, server::router(ctx))
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .context("http server")?;

    // give dispatch workers a moment to drain
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(std::env::var_os("DISABLE_COLOR").is_none())
        .try_init()
        .unwrap();

    if let Err(e) = run().await {
        eprintln!("failed to run ptt-alertor: {:?}", e);
        std::process::exit(1);
    }
}
