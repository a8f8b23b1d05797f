use std::{cmp, future::Future, time::Duration};

use tokio::time::sleep;
use tracing::warn;

use crate::{Error, Result};

/// Bounded exponential backoff parameters.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), doubling up to the cap.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }
}

/// Run `op`, retrying only `Error::Storage` failures with bounded
/// exponential backoff. Any other error (and the last storage error)
/// propagates.
pub async fn retry_storage<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0u32;
    loop {
        match op().await {
            Err(Error::Storage(msg)) if retry + 1 < policy.attempts.max(1) => {
                retry += 1;
                let delay = policy.delay_for(retry);
                warn!(
                    error = %msg,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    "storage unavailable, backing off"
                );
                sleep(delay).await;
            }
            other => return other,
        }
    }
}
