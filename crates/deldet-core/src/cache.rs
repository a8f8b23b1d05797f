use std::{collections::HashMap, time::Duration};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{ChatId, MessageId, OriginClass, SeenMessage};

/// Retention and urgency knobs for the message cache.
#[derive(Clone, Copy, Debug)]
pub struct CachePolicy {
    /// Soft size bound; crossing it triggers an age sweep on insert.
    pub capacity: usize,
    /// Entries older than this are dropped unchecked ("probably fine,
    /// stop tracking").
    pub retention: Duration,
    pub min_check_relayed: Duration,
    pub min_check_own: Duration,
    pub min_check_other: Duration,
    /// Minimum spacing between upstream probes of the same entry. A
    /// probe that finds the message present defers the next one, so a
    /// full cache costs at most capacity / recheck_interval fetches per
    /// second rather than one per entry per tick.
    pub recheck_interval: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            capacity: 200,
            retention: Duration::from_secs(600),
            min_check_relayed: Duration::from_secs(3),
            min_check_own: Duration::from_secs(5),
            min_check_other: Duration::from_secs(10),
            recheck_interval: Duration::from_secs(60),
        }
    }
}

impl CachePolicy {
    /// Minimum age before an entry becomes due for an upstream check.
    /// Staggered so normal relay propagation delay is absorbed before
    /// the first poll.
    pub fn min_check_age(&self, origin: OriginClass) -> Duration {
        match origin {
            OriginClass::Relayed => self.min_check_relayed,
            OriginClass::Own => self.min_check_own,
            OriginClass::Human => self.min_check_other,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub origin: OriginClass,
    pub seen_at: Instant,
    pub last_checked: Option<Instant>,
}

/// Bounded, time-boxed index of recently seen messages.
///
/// Exclusively owns its map; the seen-event path, the resolver, and the
/// reconciler all go through these operations. Keyed by message id, so
/// interleaved remove/insert are independently safe.
pub struct MessageCache {
    policy: CachePolicy,
    entries: Mutex<HashMap<i32, CacheEntry>>,
}

impl MessageCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn put(&self, entry: CacheEntry) {
        let mut map = self.entries.lock().await;
        map.insert(entry.message_id.0, entry);

        if map.len() > self.policy.capacity {
            let now = Instant::now();
            let before = map.len();
            map.retain(|_, e| now.saturating_duration_since(e.seen_at) <= self.policy.retention);
            let evicted = before - map.len();
            if evicted > 0 {
                debug!(evicted, remaining = map.len(), "evicted expired cache entries");
            }
        }
    }

    /// Track a freshly observed message.
    pub async fn insert_seen(&self, msg: &SeenMessage) {
        self.put(CacheEntry {
            message_id: msg.message_id,
            chat_id: msg.chat_id,
            origin: msg.origin,
            seen_at: Instant::now(),
            last_checked: None,
        })
        .await;
    }

    /// Record a completed upstream probe; the entry is not due again
    /// until the recheck interval elapses.
    pub async fn mark_checked(&self, id: MessageId, at: Instant) {
        if let Some(entry) = self.entries.lock().await.get_mut(&id.0) {
            entry.last_checked = Some(at);
        }
    }

    /// Idempotent: removing an absent id is a no-op.
    pub async fn remove(&self, id: MessageId) {
        self.entries.lock().await.remove(&id.0);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Entries whose age has crossed their class minimum but not the
    /// retention window, capped at `limit`. Entries past retention are
    /// evicted here rather than returned; entries probed within the
    /// recheck interval are skipped.
    pub async fn due_for_check(&self, now: Instant, limit: usize) -> Vec<(MessageId, ChatId)> {
        let mut map = self.entries.lock().await;

        let mut expired = Vec::new();
        let mut due = Vec::new();
        for entry in map.values() {
            let age = now.saturating_duration_since(entry.seen_at);
            if age > self.policy.retention {
                expired.push(entry.message_id.0);
            } else if age >= self.policy.min_check_age(entry.origin)
                && entry.last_checked.map_or(true, |t| {
                    now.saturating_duration_since(t) >= self.policy.recheck_interval
                })
                && due.len() < limit
            {
                due.push((entry.message_id, entry.chat_id));
            }
        }

        for id in &expired {
            map.remove(id);
        }
        if !expired.is_empty() {
            debug!(expired = expired.len(), "dropped entries past retention");
        }

        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i32, origin: OriginClass, seen_at: Instant) -> CacheEntry {
        CacheEntry {
            message_id: MessageId(id),
            chat_id: ChatId(-100),
            origin,
            seen_at,
            last_checked: None,
        }
    }

    fn policy() -> CachePolicy {
        CachePolicy::default()
    }

    #[tokio::test]
    async fn not_due_before_class_minimum() {
        let cache = MessageCache::new(policy());
        let seen = Instant::now();
        cache.put(entry(1, OriginClass::Human, seen)).await;

        // 9s old: under the 10s human threshold.
        let due = cache.due_for_check(seen + Duration::from_secs(9), 50).await;
        assert!(due.is_empty());

        let due = cache.due_for_check(seen + Duration::from_secs(11), 50).await;
        assert_eq!(due, vec![(MessageId(1), ChatId(-100))]);
    }

    #[tokio::test]
    async fn relayed_messages_become_due_soonest() {
        let cache = MessageCache::new(policy());
        let seen = Instant::now();
        cache.put(entry(1, OriginClass::Relayed, seen)).await;
        cache.put(entry(2, OriginClass::Own, seen)).await;
        cache.put(entry(3, OriginClass::Human, seen)).await;

        let mut due = cache.due_for_check(seen + Duration::from_secs(4), 50).await;
        due.sort_by_key(|(id, _)| id.0);
        assert_eq!(due, vec![(MessageId(1), ChatId(-100))]);

        let mut due = cache.due_for_check(seen + Duration::from_secs(6), 50).await;
        due.sort_by_key(|(id, _)| id.0);
        assert_eq!(
            due,
            vec![(MessageId(1), ChatId(-100)), (MessageId(2), ChatId(-100))]
        );
    }

    #[tokio::test]
    async fn entries_past_retention_are_evicted_not_returned() {
        let cache = MessageCache::new(policy());
        let seen = Instant::now();
        cache.put(entry(1, OriginClass::Human, seen)).await;

        let due = cache
            .due_for_check(seen + Duration::from_secs(601), 50)
            .await;
        assert!(due.is_empty());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn checked_entries_wait_out_the_recheck_interval() {
        let cache = MessageCache::new(policy());
        let seen = Instant::now();
        cache.put(entry(1, OriginClass::Human, seen)).await;

        let first_check = seen + Duration::from_secs(11);
        assert_eq!(cache.due_for_check(first_check, 50).await.len(), 1);
        cache.mark_checked(MessageId(1), first_check).await;

        // Not due again right away, only after the recheck interval.
        let due = cache
            .due_for_check(first_check + Duration::from_secs(30), 50)
            .await;
        assert!(due.is_empty());

        let due = cache
            .due_for_check(first_check + Duration::from_secs(61), 50)
            .await;
        assert_eq!(due, vec![(MessageId(1), ChatId(-100))]);
    }

    #[tokio::test]
    async fn due_respects_batch_limit() {
        let cache = MessageCache::new(policy());
        let seen = Instant::now();
        for i in 0..20 {
            cache.put(entry(i, OriginClass::Human, seen)).await;
        }

        let due = cache.due_for_check(seen + Duration::from_secs(30), 5).await;
        assert_eq!(due.len(), 5);
        assert_eq!(cache.len().await, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_insert_sweeps_expired_entries() {
        let mut p = policy();
        p.capacity = 3;
        let cache = MessageCache::new(p);

        for i in 0..3 {
            cache.put(entry(i, OriginClass::Human, Instant::now())).await;
        }
        tokio::time::advance(Duration::from_secs(700)).await;
        cache
            .put(entry(99, OriginClass::Human, Instant::now()))
            .await;

        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_reinsert_is_allowed() {
        let cache = MessageCache::new(policy());
        cache.remove(MessageId(5)).await;

        cache.put(entry(5, OriginClass::Own, Instant::now())).await;
        cache.remove(MessageId(5)).await;
        cache.remove(MessageId(5)).await;
        assert_eq!(cache.len().await, 0);

        cache.put(entry(5, OriginClass::Own, Instant::now())).await;
        assert_eq!(cache.len().await, 1);
    }
}
