/// Core error type for the deletion detector.
///
/// Adapter crates map their specific errors into this taxonomy so the
/// core can decide uniformly what is retryable, what is authoritative,
/// and what is fatal to a task.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Durable store unreachable or busy. Retryable with backoff;
    /// a deletion is never dropped because of this.
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// Network / rate-limit style upstream failure. Retry later and
    /// never infer deletion from it.
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    /// Credentials rejected by the upstream platform. Fatal to the
    /// listener/reconciler task; the supervisor restarts the process.
    #[error("upstream auth error: {0}")]
    UpstreamAuth(String),

    /// Downstream webhook did not accept the notification after the
    /// bounded retry budget. The ledger state is already correct.
    #[error("downstream notify failed: {0}")]
    NotifyFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
