use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    cache::MessageCache,
    domain::{DeletionEvent, DetectedVia, MessageId},
    ports::{DeletionNotifier, MarkOutcome, MessageLedger},
    util::{retry_storage, RetryPolicy},
    Result,
};

/// The single code path both detection pipelines funnel into.
///
/// Both the live listener and the poll reconciler may call `resolve`
/// concurrently for the same id; the ledger's conditional update
/// decides the winner, and only the winner may notify downstream.
pub struct DeletionResolver {
    cache: Arc<MessageCache>,
    ledger: Arc<dyn MessageLedger>,
    notifier: Arc<dyn DeletionNotifier>,
    storage_retry: RetryPolicy,
}

impl DeletionResolver {
    pub fn new(
        cache: Arc<MessageCache>,
        ledger: Arc<dyn MessageLedger>,
        notifier: Arc<dyn DeletionNotifier>,
    ) -> Self {
        Self {
            cache,
            ledger,
            notifier,
            storage_retry: RetryPolicy::default(),
        }
    }

    pub fn with_storage_retry(mut self, policy: RetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    /// Resolve one detected deletion. At most one downstream
    /// notification is ever produced per message id, across all calls
    /// and callers.
    pub async fn resolve(&self, message_id: MessageId, via: DetectedVia) -> Result<()> {
        self.cache.remove(message_id).await;

        let outcome = retry_storage(self.storage_retry, || {
            self.ledger.mark_deleted(message_id)
        })
        .await?;

        match outcome {
            MarkOutcome::AlreadyDeleted => {
                // Lost the race (the other detection path got here
                // first). Silent no-op by contract.
                debug!(
                    message_id = message_id.0,
                    via = via.as_str(),
                    "deletion already resolved"
                );
                Ok(())
            }
            MarkOutcome::NotTracked => {
                debug!(
                    message_id = message_id.0,
                    via = via.as_str(),
                    "deletion for untracked message, ignoring"
                );
                Ok(())
            }
            MarkOutcome::Marked { mapping_id } => {
                let event = DeletionEvent {
                    message_id,
                    mapping_id,
                    detected_via: via,
                    resolved_at: Utc::now(),
                };

                let Some(mapping) = &event.mapping_id else {
                    info!(
                        message_id = message_id.0,
                        via = via.as_str(),
                        "deleted message was never mirrored, nothing to propagate"
                    );
                    return Ok(());
                };

                info!(
                    message_id = message_id.0,
                    mapping_id = %mapping.0,
                    via = via.as_str(),
                    "deletion resolved, notifying relay"
                );

                // The ledger row is already correct; a failed
                // notification is logged and dropped, never unwound.
                if let Err(e) = self.notifier.notify(message_id, mapping).await {
                    warn!(
                        message_id = message_id.0,
                        mapping_id = %mapping.0,
                        error = %e,
                        "deletion recorded but downstream notification failed"
                    );
                }
                Ok(())
            }
        }
    }
}
