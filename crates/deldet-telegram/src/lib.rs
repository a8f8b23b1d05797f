//! Telegram adapter (teloxide).
//!
//! Implements the `deldet-core` upstream port over the Bot API:
//! - `listen` long-polls `getUpdates` and emits seen-message events;
//! - `fetch_message` probes message existence by copying it into a
//!   scratch chat (and deleting the copy). A "not found" class API
//!   error is the authoritative deletion signal.
//!
//! The Bot API has no deletion push channel, so this adapter emits no
//! live `Deleted` events; the poll reconciler carries detection here.
//! An MTProto-capable implementation of the same port gets the live
//! path as well.

use std::{cmp, sync::OnceLock, time::Duration};

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{AllowedUpdate, UpdateKind},
    ApiError, RequestError,
};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use deldet_core::{
    domain::{preview_of, ChatId, MessageId, OriginClass, SeenMessage},
    ports::{FetchOutcome, UpstreamClient, UpstreamEvent},
    Error, Result,
};

const LONG_POLL_TIMEOUT_SECS: u32 = 30;
const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(2);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

pub struct TelegramUpstream {
    bot: Bot,
    monitored_chat: ChatId,
    probe_chat: Option<ChatId>,
    self_id: OnceLock<u64>,
}

impl TelegramUpstream {
    pub fn from_token(token: &str, monitored_chat: ChatId, probe_chat: Option<ChatId>) -> Self {
        Self::new(Bot::new(token), monitored_chat, probe_chat)
    }

    pub fn new(bot: Bot, monitored_chat: ChatId, probe_chat: Option<ChatId>) -> Self {
        Self {
            bot,
            monitored_chat,
            probe_chat,
            self_id: OnceLock::new(),
        }
    }

    /// Establish upstream connectivity before any detection task runs.
    ///
    /// Network failures are retried with capped backoff; a rejected
    /// token is fatal immediately.
    pub async fn connect(&self, max_attempts: u32) -> Result<()> {
        let mut delay = Duration::from_secs(2);
        let mut attempt = 0u32;

        let me = loop {
            attempt += 1;
            match self.bot.get_me().await {
                Ok(me) => break me,
                Err(RequestError::Api(e)) => {
                    return Err(Error::UpstreamAuth(format!("getMe rejected: {e}")));
                }
                Err(e) if attempt < max_attempts.max(1) => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "cannot reach Telegram, retrying"
                    );
                    sleep(delay).await;
                    delay = cmp::min(delay.saturating_mul(2), CONNECT_MAX_DELAY);
                }
                Err(e) => {
                    return Err(Error::UpstreamTransient(format!(
                        "cannot reach Telegram after {attempt} attempts: {e}"
                    )));
                }
            }
        };

        let _ = self.self_id.set(me.user.id.0);
        info!(username = me.username(), "connected to Telegram");

        // Access check on the monitored chat: failure here is worth a
        // loud warning but not fatal (membership may be fixed live).
        match self.bot.get_chat(tg_chat(self.monitored_chat)).await {
            Ok(chat) => info!(
                chat_id = self.monitored_chat.0,
                title = chat.title().unwrap_or("<untitled>"),
                "monitoring chat"
            ),
            Err(e) => warn!(
                chat_id = self.monitored_chat.0,
                error = %e,
                "cannot access monitored chat"
            ),
        }

        if self.probe_chat.is_none() {
            warn!("no probe chat configured; poll reconciliation will be unable to fetch messages");
        }

        Ok(())
    }

    fn origin_of(&self, from: Option<&teloxide::types::User>) -> OriginClass {
        let Some(user) = from else {
            return OriginClass::Human;
        };
        classify_origin(user.id.0, user.is_bot, self.self_id.get().copied())
    }
}

#[async_trait]
impl UpstreamClient for TelegramUpstream {
    async fn listen(&self, tx: mpsc::Sender<UpstreamEvent>) -> Result<()> {
        let mut offset = 0i32;

        loop {
            let updates = match self
                .bot
                .get_updates()
                .offset(offset)
                .timeout(LONG_POLL_TIMEOUT_SECS)
                .allowed_updates(vec![AllowedUpdate::Message])
                .await
            {
                Ok(updates) => updates,
                Err(RequestError::RetryAfter(d)) => {
                    warn!(delay_secs = d.seconds(), "getUpdates flood limited");
                    sleep(d.duration()).await;
                    continue;
                }
                Err(RequestError::Api(e)) => {
                    // Token revoked, or another getUpdates consumer took
                    // over; either way this task cannot continue.
                    return Err(Error::UpstreamAuth(format!("getUpdates rejected: {e}")));
                }
                Err(e) => {
                    debug!(error = %e, "getUpdates transient failure");
                    sleep(NETWORK_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = cmp::max(offset, update.id.as_offset());

                let UpdateKind::Message(msg) = update.kind else {
                    continue;
                };

                let seen = SeenMessage {
                    chat_id: ChatId(msg.chat.id.0),
                    message_id: MessageId(msg.id.0),
                    origin: self.origin_of(msg.from()),
                    preview: preview_of(msg.text().or_else(|| msg.caption())),
                };

                if tx.send(UpstreamEvent::Seen(seen)).await.is_err() {
                    // Receiver gone: the service is shutting down.
                    return Ok(());
                }
            }
        }
    }

    async fn fetch_message(&self, chat_id: ChatId, id: MessageId) -> Result<FetchOutcome> {
        let Some(probe) = self.probe_chat else {
            return Err(Error::UpstreamTransient(
                "no probe chat configured, cannot fetch messages".to_string(),
            ));
        };

        let copied = self
            .bot
            .copy_message(tg_chat(probe), tg_chat(chat_id), tg_msg(id))
            .disable_notification(true)
            .await;

        match copied {
            Ok(copy_id) => {
                // Best-effort cleanup of the probe copy.
                if let Err(e) = self.bot.delete_message(tg_chat(probe), copy_id).await {
                    debug!(error = %e, "failed to delete probe copy");
                }
                Ok(FetchOutcome::Present)
            }
            Err(RequestError::Api(e)) if is_not_found(&e) => Ok(FetchOutcome::Missing),
            Err(RequestError::Api(e)) if is_auth_error(&e) => {
                Err(Error::UpstreamAuth(format!("copyMessage rejected: {e}")))
            }
            Err(e) => Err(Error::UpstreamTransient(format!("copyMessage failed: {e}"))),
        }
    }
}

fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

fn tg_msg(id: MessageId) -> teloxide::types::MessageId {
    teloxide::types::MessageId(id.0)
}

fn classify_origin(user_id: u64, is_bot: bool, self_id: Option<u64>) -> OriginClass {
    if self_id == Some(user_id) {
        OriginClass::Own
    } else if is_bot {
        OriginClass::Relayed
    } else {
        OriginClass::Human
    }
}

/// API errors that authoritatively mean "this message no longer
/// exists". Anything else must be treated as transient; deletion is
/// never inferred from a failed fetch.
fn is_not_found(e: &ApiError) -> bool {
    match e {
        ApiError::MessageIdInvalid
        | ApiError::MessageToForwardNotFound
        | ApiError::MessageToCopyNotFound => true,
        ApiError::Unknown(text) => {
            let text = text.to_lowercase();
            text.contains("message_id_invalid") || text.contains("not found")
        }
        _ => false,
    }
}

fn is_auth_error(e: &ApiError) -> bool {
    matches!(e, ApiError::Unknown(text) if text.contains("Unauthorized"))
}
