//! The ingestion pollers: four perpetual loops feeding the dispatcher.
//!
//! Each loop runs one round, sleeps, and checks the shutdown signal between
//! rounds and between boards. Rounds are panic-isolated the same way the
//! scheduled-job runners are: a panicking round is logged and the loop
//! relaunches after a short pause.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Duration;

use crate::cache::UserProfile;
use crate::dispatcher::Dispatcher;
use crate::{sync, Context};

pub mod comments;
pub mod monitor;
pub mod new_articles;
pub mod pushsum;

const NEW_ARTICLES_INTERVAL: Duration = Duration::from_secs(30);
const HIGH_TRAFFIC_INTERVAL: Duration = Duration::from_secs(10);
const PUSHSUM_INTERVAL: Duration = Duration::from_secs(300);
const COMMENTS_INTERVAL: Duration = Duration::from_secs(120);
const MONITOR_INTERVAL: Duration = Duration::from_secs(1800);

const PANIC_RELAUNCH_DELAY: Duration = Duration::from_secs(5);

/// Starts every poller. Each checks `shutdown` between rounds; dropping the
/// sender side is not used for shutdown, flipping the value is.
pub fn spawn_all(ctx: Arc<Context>, dispatcher: Dispatcher, shutdown: watch::Receiver<bool>) {
    {
        let (ctx, dispatcher, shutdown) = (ctx.clone(), dispatcher.clone(), shutdown.clone());
        spawn_loop("new-articles", NEW_ARTICLES_INTERVAL, shutdown.clone(), move || {
            let (ctx, dispatcher, shutdown) = (ctx.clone(), dispatcher.clone(), shutdown.clone());
            async move { new_articles::round(&ctx, &dispatcher, false, &shutdown).await }
        });
    }
    {
        let (ctx, dispatcher, shutdown) = (ctx.clone(), dispatcher.clone(), shutdown.clone());
        spawn_loop(
            "new-articles-high-traffic",
            HIGH_TRAFFIC_INTERVAL,
            shutdown.clone(),
            move || {
                let (ctx, dispatcher, shutdown) = (ctx.clone(), dispatcher.clone(), shutdown.clone());
                async move { new_articles::round(&ctx, &dispatcher, true, &shutdown).await }
            },
        );
    }
    {
        let (ctx, dispatcher, shutdown) = (ctx.clone(), dispatcher.clone(), shutdown.clone());
        spawn_loop("pushsum", PUSHSUM_INTERVAL, shutdown.clone(), move || {
            let (ctx, dispatcher, shutdown) = (ctx.clone(), dispatcher.clone(), shutdown.clone());
            async move { pushsum::round(&ctx, &dispatcher, &shutdown).await }
        });
    }
    {
        let (ctx, dispatcher, shutdown) = (ctx.clone(), dispatcher.clone(), shutdown.clone());
        spawn_loop("comments", COMMENTS_INTERVAL, shutdown.clone(), move || {
            let (ctx, dispatcher, shutdown) = (ctx.clone(), dispatcher.clone(), shutdown.clone());
            async move { comments::round(&ctx, &dispatcher, &shutdown).await }
        });
    }
    {
        let shutdown_inner = shutdown.clone();
        spawn_loop("monitor", MONITOR_INTERVAL, shutdown, move || {
            let (ctx, shutdown) = (ctx.clone(), shutdown_inner.clone());
            async move { monitor::round(&ctx, &shutdown).await }
        });
    }
}

/// Runs `round` forever with `period` sleeps. A failed round is logged and
/// retried next period; a panicking round additionally waits a beat so a
/// hard failure cannot spin.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    round: F,
) where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!(poller = name, "poller started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let handle = tokio::spawn(round());
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(poller = name, "round failed: {e:?}");
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(poller = name, "round panicked (error={e}), relaunching");
                    tokio::time::sleep(PANIC_RELAUNCH_DELAY).await;
                }
                Err(_) => {}
            }
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!(poller = name, "poller stopped");
    });
}

/// Dispatch-time profile lookup: the cache first, rebuilt from the store on a
/// miss so a flushed cache only costs one extra write.
pub(crate) async fn profile_for(
    ctx: &Context,
    account: &str,
) -> anyhow::Result<Option<UserProfile>> {
    if let Some(profile) = ctx.cache.profile(account).await? {
        return Ok(Some(profile));
    }
    let Some(user_id) = crate::cache::user_id_of_account(account) else {
        return Ok(None);
    };
    sync::rewrite_profile(ctx, user_id).await?;
    ctx.cache.profile(account).await
}
