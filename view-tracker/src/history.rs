//! Recency store for view events.
//!
//! A concurrent map from visitor key to the timestamp-ordered sequence of
//! events recorded for that key. The access pattern is read-preferring: the
//! organic-view check only takes a read lock, so many request workers can
//! check concurrently, while recording and sweeping serialize on the write
//! lock. No I/O ever happens while either lock is held.
//!
//! Sequences are append-only and ordered by observation time (timestamps are
//! monotonically non-decreasing in practice, since recording happens at
//! observation time). A key is present iff its sequence is non-empty; sweep
//! removes keys rather than leaving empty sequences behind.

use crate::event::{ViewEvent, VisitorKey};
use std::{collections::HashMap, sync::RwLock};

/// Concurrent per-visitor view history with a bounded lifetime per entry.
#[derive(Debug, Default)]
pub struct ViewHistory {
    inner: RwLock<HashMap<VisitorKey, Vec<ViewEvent>>>,
}

impl ViewHistory {
    /// Make a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the sequence for its visitor key, creating the
    /// sequence on first use. Never fails.
    pub fn record(&self, event: ViewEvent) {
        let key = event.visitor_key();
        let mut guard = self.inner.write().unwrap();
        guard.entry(key).or_default().push(event);
    }

    /// The most recently recorded event for a key, or `None` if the key has
    /// no history.
    pub fn last_event(&self, key: &VisitorKey) -> Option<ViewEvent> {
        let guard = self.inner.read().unwrap();
        guard.get(key).and_then(|events| events.last().cloned())
    }

    /// Drop every event with `ts_secs <= now - cooldown_secs`, and every key
    /// whose sequence becomes empty. Idempotent for a fixed `now`; cannot
    /// fail.
    pub fn sweep(&self, now: i64, cooldown_secs: i64) {
        let cutoff = now - cooldown_secs;
        let mut guard = self.inner.write().unwrap();
        guard.retain(|_key, events| {
            events.retain(|event| event.ts_secs > cutoff);
            !events.is_empty()
        });
    }

    /// Access the whole map under a read lock.
    pub fn with_read_lock<R, A>(&self, access: A) -> R
    where
        A: FnOnce(&HashMap<VisitorKey, Vec<ViewEvent>>) -> R,
    {
        let guard = self.inner.read().unwrap();
        access(&guard)
    }

    /// Number of visitor keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Returns true if no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Visitor;

    fn event(ip: &str, table: &str, object_id: i64, ts_secs: i64) -> ViewEvent {
        let visitor = Visitor {
            ip: ip.to_owned(),
            user_agent: "test-agent".to_owned(),
        };
        ViewEvent::new(&visitor, table, object_id, ts_secs)
    }

    #[test]
    fn test_last_event_empty() {
        let history = ViewHistory::new();
        let key = event("10.0.0.1", "posts", 7, 0).visitor_key();

        assert!(history.last_event(&key).is_none());
        assert!(history.is_empty());
    }

    #[test]
    fn test_record_is_append_only_and_order_preserving() {
        let history = ViewHistory::new();
        let key = event("10.0.0.1", "posts", 7, 0).visitor_key();

        history.record(event("10.0.0.1", "posts", 7, 10));
        history.record(event("10.0.0.1", "posts", 7, 20));
        history.record(event("10.0.0.1", "posts", 7, 30));

        assert_eq!(history.last_event(&key).unwrap().ts_secs, 30);
        let timestamps = history.with_read_lock(|map| {
            map[&key].iter().map(|e| e.ts_secs).collect::<Vec<_>>()
        });
        assert_eq!(timestamps, vec![10, 20, 30]);
    }

    #[test]
    fn test_sweep_removes_stale_events_and_empty_keys() {
        let history = ViewHistory::new();
        let key_a = event("10.0.0.1", "posts", 7, 0).visitor_key();
        let key_b = event("10.0.0.2", "posts", 7, 0).visitor_key();

        history.record(event("10.0.0.1", "posts", 7, 0));
        history.record(event("10.0.0.1", "posts", 7, 100));
        history.record(event("10.0.0.1", "posts", 7, 2000));
        history.record(event("10.0.0.2", "posts", 7, 50));

        // cutoff = 2000 - 1800 = 200: drops ts 0, 100, and 50
        history.sweep(2000, 1800);

        let remaining = history.with_read_lock(|map| {
            map[&key_a].iter().map(|e| e.ts_secs).collect::<Vec<_>>()
        });
        assert_eq!(remaining, vec![2000]);
        assert!(history.last_event(&key_b).is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_sweep_cutoff_boundary() {
        let history = ViewHistory::new();
        let key = event("10.0.0.1", "posts", 7, 0).visitor_key();

        // cutoff = 1900 - 1800 = 100: an event exactly at the cutoff goes too
        history.record(event("10.0.0.1", "posts", 7, 100));
        history.record(event("10.0.0.1", "posts", 7, 101));
        history.sweep(1900, 1800);

        let remaining = history.with_read_lock(|map| {
            map[&key].iter().map(|e| e.ts_secs).collect::<Vec<_>>()
        });
        assert_eq!(remaining, vec![101]);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let history = ViewHistory::new();

        history.record(event("10.0.0.1", "posts", 7, 0));
        history.record(event("10.0.0.1", "posts", 7, 500));
        history.record(event("10.0.0.2", "articles", 3, 400));

        let snapshot = |h: &ViewHistory| {
            h.with_read_lock(|map| {
                let mut entries: Vec<_> = map
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.iter().map(|e| e.ts_secs).collect::<Vec<_>>()))
                    .collect();
                entries.sort();
                entries
            })
        };

        history.sweep(2000, 1800);
        let once = snapshot(&history);
        history.sweep(2000, 1800);
        assert_eq!(snapshot(&history), once);
    }

    #[test]
    fn test_keys_do_not_interact() {
        let history = ViewHistory::new();
        let key_a = event("10.0.0.1", "posts", 7, 0).visitor_key();
        let key_b = event("10.0.0.1", "posts", 8, 0).visitor_key();

        history.record(event("10.0.0.1", "posts", 7, 10));
        history.record(event("10.0.0.1", "posts", 8, 3000));

        // Sweeping out key A's only event leaves key B untouched
        history.sweep(2000, 1800);

        assert!(history.last_event(&key_a).is_none());
        assert_eq!(history.last_event(&key_b).unwrap().ts_secs, 3000);
    }
}
