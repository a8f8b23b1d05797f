//! Webhook adapter for downstream deletion notifications.
//!
//! Posts resolved deletions to the relay coordinator's deletion
//! endpoint. Delivery is best-effort with a bounded retry budget; the
//! ledger is the source of truth either way.

use std::{cmp, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use deldet_core::{
    domain::{MappingId, MessageId},
    ports::DeletionNotifier,
    Error, Result,
};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

pub struct WebhookNotifier {
    url: String,
    http: reqwest::Client,
    max_attempts: u32,
}

impl WebhookNotifier {
    /// `timeout` bounds each POST so one slow webhook cannot stall the
    /// resolver pipeline.
    pub fn new(url: impl Into<String>, timeout: Duration, max_attempts: u32) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            url: url.into(),
            http,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl DeletionNotifier for WebhookNotifier {
    async fn notify(&self, message_id: MessageId, mapping_id: &MappingId) -> Result<()> {
        let payload = deletion_payload(message_id, mapping_id);

        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=self.max_attempts {
            match self.http.post(&self.url).json(&payload).send().await {
                // The endpoint's contract is strict: 200 means applied,
                // anything else means not applied.
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                    debug!(message_id = message_id.0, attempt, "deletion webhook delivered");
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        message_id = message_id.0,
                        attempt,
                        status = %resp.status(),
                        "deletion webhook rejected"
                    );
                }
                Err(e) => {
                    warn!(
                        message_id = message_id.0,
                        attempt,
                        error = %e,
                        "deletion webhook unreachable"
                    );
                }
            }

            if attempt < self.max_attempts {
                sleep(delay).await;
                delay = cmp::min(delay.saturating_mul(2), RETRY_MAX_DELAY);
            }
        }

        Err(Error::NotifyFailed(format!(
            "webhook {} failed after {} attempts",
            self.url, self.max_attempts
        )))
    }
}

fn deletion_payload(message_id: MessageId, mapping_id: &MappingId) -> serde_json::Value {
    serde_json::json!({
        "telegram_msg_id": message_id.0,
        "mapping_id": mapping_id.0,
    })
}
