use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{domain::ChatId, errors::Error, Result};

/// Typed configuration for the deletion detector.
///
/// Everything is env-driven with the same defaults the service has
/// always shipped with; a local `.env` file is honored but never
/// overrides the real environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Upstream
    pub telegram_bot_token: String,
    pub monitored_chat: ChatId,
    /// Scratch chat used by the Bot API adapter to probe message
    /// existence. Optional: without it, poll reconciliation degrades to
    /// live-events-only.
    pub probe_chat: Option<ChatId>,

    // Startup
    pub db_path: PathBuf,
    /// Bounded retry budget for startup dependencies (storage open,
    /// upstream connectivity) before exiting non-zero.
    pub startup_attempts: u32,

    // Downstream webhook
    pub webhook_url: String,
    pub notify_timeout: Duration,
    pub notify_max_attempts: u32,

    // Poll reconciler
    pub poll_initial_delay: Duration,
    pub poll_interval: Duration,
    pub poll_batch_limit: usize,
    /// Minimum spacing between upstream probes of one message.
    pub poll_recheck_interval: Duration,

    // Cache
    pub cache_capacity: usize,
    pub cache_retention: Duration,
    pub min_check_relayed: Duration,
    pub min_check_own: Duration,
    pub min_check_other: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let group_id = env_i64("TELEGRAM_GROUP_ID").unwrap_or(0);
        if group_id == 0 {
            return Err(Error::Config(
                "TELEGRAM_GROUP_ID environment variable is required".to_string(),
            ));
        }
        let monitored_chat = ChatId(group_id);
        let probe_chat = env_i64("TELEGRAM_PROBE_CHAT_ID").map(ChatId);

        let db_path = env_path("DELDET_DB_PATH").unwrap_or_else(|| PathBuf::from("relay_messages.db"));
        let startup_attempts = env_u32("STARTUP_MAX_ATTEMPTS").unwrap_or(10);

        // The webhook lives next to the relay coordinator; WEBHOOK_URL
        // overrides the localhost-port shorthand.
        let webhook_port = env_str("WEBHOOK_PORT").unwrap_or_else(|| "5847".to_string());
        let webhook_url = env_str("WEBHOOK_URL").unwrap_or_else(|| {
            format!("http://localhost:{webhook_port}/api/deletion-webhook")
        });
        let notify_timeout = Duration::from_secs(env_u64("NOTIFY_TIMEOUT_SECS").unwrap_or(10));
        let notify_max_attempts = env_u32("NOTIFY_MAX_ATTEMPTS").unwrap_or(3);

        let poll_initial_delay =
            Duration::from_secs(env_u64("POLL_STARTUP_DELAY_SECS").unwrap_or(10));
        let poll_interval = Duration::from_secs(env_u64("POLL_INTERVAL_SECS").unwrap_or(15));
        let poll_batch_limit = env_usize("POLL_BATCH_LIMIT").unwrap_or(50);
        let poll_recheck_interval =
            Duration::from_secs(env_u64("POLL_RECHECK_SECS").unwrap_or(60));

        let cache_capacity = env_usize("CACHE_CAPACITY").unwrap_or(200);
        let cache_retention = Duration::from_secs(env_u64("CACHE_MAX_AGE_SECS").unwrap_or(600));
        let min_check_relayed =
            Duration::from_secs(env_u64("MIN_CHECK_RELAYED_SECS").unwrap_or(3));
        let min_check_own = Duration::from_secs(env_u64("MIN_CHECK_OWN_SECS").unwrap_or(5));
        let min_check_other = Duration::from_secs(env_u64("MIN_CHECK_OTHER_SECS").unwrap_or(10));

        Ok(Self {
            telegram_bot_token,
            monitored_chat,
            probe_chat,
            db_path,
            startup_attempts,
            webhook_url,
            notify_timeout,
            notify_max_attempts,
            poll_initial_delay,
            poll_interval,
            poll_batch_limit,
            poll_recheck_interval,
            cache_capacity,
            cache_retention,
            min_check_relayed,
            min_check_own,
            min_check_other,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}
