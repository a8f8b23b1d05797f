use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use deldet_core::{
    cache::{CachePolicy, MessageCache},
    config::Config,
    listener::LiveListener,
    ports::UpstreamClient,
    reconciler::{PollReconciler, PollSettings},
    resolver::DeletionResolver,
};
use deldet_sqlite::SqliteLedger;
use deldet_telegram::TelegramUpstream;
use deldet_webhook::WebhookNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    deldet_core::logging::init("deldet")?;

    let cfg = Config::load()?;

    // Storage must be usable before any detection task starts; the
    // upstream connection is verified next for the same reason.
    let ledger = Arc::new(
        SqliteLedger::open_with_retries(&cfg.db_path, cfg.startup_attempts).await?,
    );
    info!(db = %cfg.db_path.display(), "message ledger ready");

    let upstream = Arc::new(TelegramUpstream::from_token(
        &cfg.telegram_bot_token,
        cfg.monitored_chat,
        cfg.probe_chat,
    ));
    upstream.connect(cfg.startup_attempts).await?;

    let notifier = Arc::new(WebhookNotifier::new(
        cfg.webhook_url.clone(),
        cfg.notify_timeout,
        cfg.notify_max_attempts,
    ));

    let cache = Arc::new(MessageCache::new(CachePolicy {
        capacity: cfg.cache_capacity,
        retention: cfg.cache_retention,
        min_check_relayed: cfg.min_check_relayed,
        min_check_own: cfg.min_check_own,
        min_check_other: cfg.min_check_other,
        recheck_interval: cfg.poll_recheck_interval,
    }));

    let resolver = Arc::new(DeletionResolver::new(
        cache.clone(),
        ledger.clone(),
        notifier,
    ));
    let listener = LiveListener::new(&cfg, cache.clone(), ledger.clone(), resolver.clone());
    let reconciler = PollReconciler::new(PollSettings::from(&cfg), cache, upstream.clone(), resolver);

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(256);

    let mut upstream_task = tokio::spawn({
        let upstream = upstream.clone();
        async move { upstream.listen(tx).await }
    });
    let listener_task = tokio::spawn(async move { listener.run(rx).await });
    let mut reconciler_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { reconciler.run(cancel).await }
    });

    info!("deletion detector running");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        res = &mut upstream_task => fatal = task_error("upstream listener", res),
        res = &mut reconciler_task => fatal = task_error("poll reconciler", res),
    }

    // Tear down: stop the reconciler, drop the event source, and let
    // the listener drain its channel and exit on its own.
    cancel.cancel();
    upstream_task.abort();
    reconciler_task.abort();
    let _ = listener_task.await;

    match fatal {
        Some(e) => {
            error!(error = %e, "exiting after fatal task failure");
            Err(e)
        }
        None => {
            info!("deletion detector stopped");
            Ok(())
        }
    }
}

fn task_error(
    name: &str,
    res: Result<deldet_core::Result<()>, tokio::task::JoinError>,
) -> Option<anyhow::Error> {
    match res {
        Ok(Ok(())) => {
            info!(task = name, "task finished");
            None
        }
        Ok(Err(e)) => Some(anyhow::anyhow!("{name} failed: {e}")),
        Err(e) => Some(anyhow::anyhow!("{name} panicked: {e}")),
    }
}
