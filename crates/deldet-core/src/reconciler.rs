use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cache::MessageCache,
    config::Config,
    domain::DetectedVia,
    ports::{FetchOutcome, UpstreamClient},
    resolver::DeletionResolver,
    Error, Result,
};

#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Per-tick cap on upstream fetches, to bound burst load.
    pub batch_limit: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(15),
            batch_limit: 50,
        }
    }
}

impl From<&Config> for PollSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            initial_delay: cfg.poll_initial_delay,
            interval: cfg.poll_interval,
            batch_limit: cfg.poll_batch_limit,
        }
    }
}

/// Backstop for the live event stream: re-checks recently seen,
/// not-yet-deleted messages directly against the upstream platform on a
/// fixed interval.
///
/// A fixed interval (rather than a per-message timer) bounds worst-case
/// API call volume; acceptable detection latency here is seconds.
pub struct PollReconciler {
    settings: PollSettings,
    cache: Arc<MessageCache>,
    upstream: Arc<dyn UpstreamClient>,
    resolver: Arc<DeletionResolver>,
}

impl PollReconciler {
    pub fn new(
        settings: PollSettings,
        cache: Arc<MessageCache>,
        upstream: Arc<dyn UpstreamClient>,
        resolver: Arc<DeletionResolver>,
    ) -> Self {
        Self {
            settings,
            cache,
            upstream,
            resolver,
        }
    }

    /// Run until cancelled. Returns an error only for failures fatal to
    /// the task (upstream credentials rejected); the supervisor is
    /// expected to restart the process in that case.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sleep(self.settings.initial_delay) => {}
        }

        info!(
            interval_secs = self.settings.interval.as_secs(),
            batch_limit = self.settings.batch_limit,
            "poll reconciler started"
        );

        let mut tick = tokio::time::interval(self.settings.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await; // first tick completes immediately

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    match self.sweep_once().await {
                        Ok(stats) if stats.deleted > 0 => {
                            info!(checked = stats.checked, deleted = stats.deleted, "sweep found deletions");
                        }
                        Ok(stats) => {
                            if stats.checked > 0 {
                                debug!(checked = stats.checked, "sweep complete");
                            }
                        }
                        Err(e @ Error::UpstreamAuth(_)) => {
                            error!(error = %e, "upstream rejected credentials, stopping reconciler");
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "sweep failed, will retry next tick"),
                    }
                }
            }
        }

        Ok(())
    }

    /// One sweep: fetch every due cache entry and classify the result.
    /// Per-message failures never abort the rest of the batch.
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let now = Instant::now();
        let due = self.cache.due_for_check(now, self.settings.batch_limit).await;

        let mut stats = SweepStats {
            checked: due.len(),
            deleted: 0,
        };

        for (message_id, chat_id) in due {
            match self.upstream.fetch_message(chat_id, message_id).await {
                Ok(FetchOutcome::Present) => {
                    // Still there; defer its next probe so a full cache
                    // cannot saturate upstream send limits.
                    self.cache.mark_checked(message_id, now).await;
                }
                Ok(FetchOutcome::Missing) => {
                    debug!(message_id = message_id.0, "message gone upstream");
                    stats.deleted += 1;
                    if let Err(e) = self.resolver.resolve(message_id, DetectedVia::Poll).await {
                        warn!(
                            message_id = message_id.0,
                            error = %e,
                            "failed to resolve polled deletion"
                        );
                    }
                }
                Err(e @ Error::UpstreamAuth(_)) => return Err(e),
                Err(e) => {
                    // Transient: leave the entry cached, never infer
                    // deletion from a failed fetch.
                    debug!(
                        message_id = message_id.0,
                        error = %e,
                        "fetch failed, retrying next tick"
                    );
                }
            }
        }

        Ok(stats)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SweepStats {
    pub checked: usize,
    pub deleted: usize,
}
