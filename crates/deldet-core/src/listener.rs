use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    cache::MessageCache,
    config::Config,
    domain::{ChatId, DetectedVia},
    ports::{MessageLedger, UpstreamEvent},
    resolver::DeletionResolver,
    util::{retry_storage, RetryPolicy},
    Result,
};

/// Consumes the upstream push stream: tracks new messages and funnels
/// live deletion batches into the resolver.
///
/// The upstream client may deliver events for chats this process has
/// incidentally observed; those are filtered here and discarded without
/// error, never by silencing the client itself.
pub struct LiveListener {
    monitored_chat: ChatId,
    cache: Arc<MessageCache>,
    ledger: Arc<dyn MessageLedger>,
    resolver: Arc<DeletionResolver>,
    storage_retry: RetryPolicy,
}

impl LiveListener {
    pub fn new(
        cfg: &Config,
        cache: Arc<MessageCache>,
        ledger: Arc<dyn MessageLedger>,
        resolver: Arc<DeletionResolver>,
    ) -> Self {
        Self::for_chat(cfg.monitored_chat, cache, ledger, resolver)
    }

    pub fn for_chat(
        monitored_chat: ChatId,
        cache: Arc<MessageCache>,
        ledger: Arc<dyn MessageLedger>,
        resolver: Arc<DeletionResolver>,
    ) -> Self {
        Self {
            monitored_chat,
            cache,
            ledger,
            resolver,
            storage_retry: RetryPolicy::default(),
        }
    }

    pub fn with_storage_retry(mut self, policy: RetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    /// Drain events until the sender side closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<UpstreamEvent>) -> Result<()> {
        info!(chat_id = self.monitored_chat.0, "live listener started");

        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }

        info!("upstream event stream closed");
        Ok(())
    }

    async fn handle(&self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Seen(msg) => {
                if msg.chat_id != self.monitored_chat {
                    return;
                }

                let recorded = retry_storage(self.storage_retry, || {
                    self.ledger.record_seen(&msg)
                })
                .await;
                if let Err(e) = recorded {
                    // Without a ledger row a later deletion could only
                    // resolve to NotTracked, so caching it would strand
                    // the detection. Leave it untracked instead.
                    warn!(
                        message_id = msg.message_id.0,
                        error = %e,
                        "failed to record seen message, not tracking"
                    );
                    return;
                }

                self.cache.insert_seen(&msg).await;
                let cached = self.cache.len().await;
                debug!(
                    message_id = msg.message_id.0,
                    origin = ?msg.origin,
                    cached,
                    "tracking message"
                );
            }
            UpstreamEvent::Deleted { chat_id, message_ids } => {
                if chat_id != self.monitored_chat {
                    debug!(
                        chat_id = chat_id.0,
                        count = message_ids.len(),
                        "ignoring deletions for unmonitored chat"
                    );
                    return;
                }

                info!(count = message_ids.len(), "live deletion batch received");
                for id in message_ids {
                    // One bad message must not abort the rest of the batch.
                    if let Err(e) = self.resolver.resolve(id, DetectedVia::Live).await {
                        warn!(
                            message_id = id.0,
                            error = %e,
                            "failed to resolve live deletion"
                        );
                    }
                }
            }
        }
    }
}
