use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    domain::{ChatId, MappingId, MessageId, SeenMessage, TrackedMessage},
    Result,
};

/// Outcome of `MessageLedger::mark_deleted`.
///
/// The ledger is the sole synchronization point for deletion state:
/// exactly one of any number of concurrent callers observes `Marked`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkOutcome {
    /// This call won the transition. Carries the mapping id as read at
    /// mark time (it may have arrived after the message was first seen,
    /// or never at all).
    Marked { mapping_id: Option<MappingId> },
    /// Some earlier call already marked the row.
    AlreadyDeleted,
    /// No ledger row exists for this id (never recorded as seen).
    NotTracked,
}

/// Durable store of tracked messages and their deletion state.
#[async_trait]
pub trait MessageLedger: Send + Sync {
    /// Insert-or-ignore keyed by platform message id. Duplicate seen
    /// notifications must not error or duplicate rows.
    async fn record_seen(&self, msg: &SeenMessage) -> Result<()>;

    /// Called by the relay once mirroring completes; no-op if the
    /// mapping is already set.
    async fn attach_mapping(&self, id: MessageId, mapping: &MappingId) -> Result<()>;

    /// The only deletion-state transition. Must be a conditional update
    /// checked by affected-row count so concurrent callers race safely.
    async fn mark_deleted(&self, id: MessageId) -> Result<MarkOutcome>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<TrackedMessage>>;
    async fn find_by_mapping(&self, mapping: &MappingId) -> Result<Option<TrackedMessage>>;
}

/// Delivery of a resolved deletion to the relay coordinator.
#[async_trait]
pub trait DeletionNotifier: Send + Sync {
    /// At-least-once with idempotent apply on the receiving side; the
    /// caller guarantees at most one invocation per message.
    async fn notify(&self, message_id: MessageId, mapping_id: &MappingId) -> Result<()>;
}

/// Result of asking the upstream platform for a single message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    Present,
    /// Authoritative: the platform says the message no longer exists.
    Missing,
}

/// Push-style events from the upstream platform.
#[derive(Clone, Debug)]
pub enum UpstreamEvent {
    Seen(SeenMessage),
    /// A batch of deletions, as delivered by the platform. May belong
    /// to a chat we do not monitor.
    Deleted {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
    },
}

/// The upstream chat platform client.
///
/// Implementations are fallible and rate-limited; the core never
/// assumes the live event stream is complete.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Long-running: feed events into `tx` until the stream ends or the
    /// receiver is dropped.
    async fn listen(&self, tx: mpsc::Sender<UpstreamEvent>) -> Result<()>;

    /// Direct lookup used by the poll reconciler. `Missing` is the only
    /// result deletion may be inferred from; transient failures come
    /// back as `Error::UpstreamTransient`.
    async fn fetch_message(&self, chat_id: ChatId, id: MessageId) -> Result<FetchOutcome>;
}
