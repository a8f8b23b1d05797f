use chrono::{DateTime, Utc};

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Platform-native message id (numeric on Telegram).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// Cross-platform identifier correlating copies of the same logical
/// message across platforms. Assigned asynchronously by the relay.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MappingId(pub String);

/// Who produced a tracked message. Only used to pick poll urgency:
/// relayed bot copies are checked soonest, our own messages next,
/// everyone else last.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OriginClass {
    /// Another bot (in practice: the relay's mirrored copies).
    Relayed,
    /// Sent by this account.
    Own,
    /// A human participant.
    Human,
}

/// Which detection path produced a deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectedVia {
    Live,
    Poll,
}

impl DetectedVia {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectedVia::Live => "live",
            DetectedVia::Poll => "poll",
        }
    }
}

/// Maximum length of the stored content preview (diagnostics only).
pub const PREVIEW_MAX_CHARS: usize = 50;

/// A message observed in the monitored chat.
#[derive(Clone, Debug)]
pub struct SeenMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub origin: OriginClass,
    pub preview: String,
}

/// Truncate message text to a short diagnostic preview.
pub fn preview_of(text: Option<&str>) -> String {
    let text = text.unwrap_or("[Media]");
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        text.to_string()
    } else {
        text.chars().take(PREVIEW_MAX_CHARS).collect()
    }
}

/// Durable ledger row for a tracked message.
#[derive(Clone, Debug)]
pub struct TrackedMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub mapping_id: Option<MappingId>,
    pub preview: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A resolved deletion. Transient: produced once per message, handed to
/// the notifier, never persisted.
#[derive(Clone, Debug)]
pub struct DeletionEvent {
    pub message_id: MessageId,
    pub mapping_id: Option<MappingId>,
    pub detected_via: DetectedVia,
    pub resolved_at: DateTime<Utc>,
}
