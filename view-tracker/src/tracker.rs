//! View tracking and deduplication.
//!
//! [`ViewTracker`] decides, for each inbound view event, whether it should
//! count toward the persisted view counter (an "organic" view) or be treated
//! as a repeat within the cooldown window. Every handled event also triggers
//! a background sweep that ages stale history out of memory.
//!
//! Two near-simultaneous events for the same visitor can race the
//! decide-then-record sequence and both be judged organic. That occasional
//! double increment is accepted; the alternative is holding the write lock
//! across the whole sequence, including the database call.

use crate::{
    counter::{CounterError, CounterStore},
    event::{ViewEvent, Visitor, VisitorKey},
    history::ViewHistory,
};
use chrono::Utc;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, warn};

/// What became of a handled view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewOutcome {
    /// The view was organic: the persisted counter was incremented.
    Counted,
    /// The same visitor already viewed this target within the cooldown
    /// window; the counter was left alone.
    Duplicate,
}

/// Errors surfaced to callers of [`ViewTracker::handle_view`].
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// The counter store failed. The event is still recorded, so the visitor
    /// stays marked as seen for the rest of the window.
    #[error("failed to increment view count for {table}[{object_id}]")]
    Increment {
        /// Table whose counter the increment targeted.
        table: String,
        /// Id of the object whose counter the increment targeted.
        object_id: i64,
        /// The underlying store failure.
        #[source]
        source: CounterError,
    },
}

/// Tracks views per visitor and increments persisted counters at most once
/// per visitor per cooldown window.
pub struct ViewTracker {
    history: Arc<ViewHistory>,
    counters: Box<dyn CounterStore>,
    /// The cooldown window, in the same seconds used for every comparison.
    cooldown_secs: i64,
    /// Held by whichever task is currently sweeping, so concurrent triggers
    /// coalesce instead of queueing on the history write lock.
    sweep_gate: Arc<Mutex<()>>,
}

impl ViewTracker {
    /// Create a tracker over the given counter store. The cooldown window is
    /// fixed for the tracker's lifetime.
    pub fn new(counters: Box<dyn CounterStore>, cooldown: Duration) -> Self {
        Self {
            history: Arc::new(ViewHistory::new()),
            counters,
            cooldown_secs: cooldown.as_secs().try_into().unwrap_or(i64::MAX),
            sweep_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Decide whether a view for `key` observed at `now` (unix seconds) is
    /// organic: either the key has no history, or its latest event is
    /// strictly older than the cooldown window. A repeat landing exactly on
    /// the window boundary is not organic.
    ///
    /// Read-only. Must be evaluated before the current event is recorded, so
    /// the event never counts as its own predecessor.
    pub fn is_organic(&self, key: &VisitorKey, now: i64) -> bool {
        match self.history.last_event(key) {
            None => true,
            Some(last) => now - last.ts_secs > self.cooldown_secs,
        }
    }

    /// Run one sweep of the recency store, dropping events older than the
    /// cooldown window as of `now`.
    pub fn sweep_once(&self, now: i64) {
        self.history.sweep(now, self.cooldown_secs);
    }

    /// Trigger a sweep without blocking the caller. If a sweep is already
    /// running the trigger is dropped; per-key pruning is idempotent, so the
    /// running sweep covers it.
    fn spawn_sweep(&self, now: i64) {
        let history = Arc::clone(&self.history);
        let gate = Arc::clone(&self.sweep_gate);
        let cooldown_secs = self.cooldown_secs;
        tokio::spawn(async move {
            if let Ok(_gate) = gate.try_lock() {
                history.sweep(now, cooldown_secs);
            }
        });
    }

    /// Handle a view observed at the current wall-clock time.
    ///
    /// See [`ViewTracker::handle_view_at`].
    pub async fn handle_view(
        &self,
        visitor: &Visitor,
        table: &str,
        object_id: i64,
    ) -> Result<ViewOutcome, TrackError> {
        self.handle_view_at(visitor, table, object_id, Utc::now().timestamp())
            .await
    }

    /// Handle a view with an explicit observation timestamp (unix seconds).
    ///
    /// Schedules a sweep (fire-and-forget), decides whether the view is
    /// organic against the history as it stands, increments the persisted
    /// counter when it is, and records the event afterward - unconditionally.
    /// A failed increment is surfaced as [`TrackError::Increment`], but the
    /// event is recorded anyway, so a misbehaving client cannot retry its way
    /// to an increment within the same window.
    pub async fn handle_view_at(
        &self,
        visitor: &Visitor,
        table: &str,
        object_id: i64,
        now: i64,
    ) -> Result<ViewOutcome, TrackError> {
        let event = ViewEvent::new(visitor, table, object_id, now);
        let key = event.visitor_key();

        self.spawn_sweep(now);

        let result = if self.is_organic(&key, now) {
            match self.counters.increment(table, object_id).await {
                Ok(0) => {
                    warn!("view counter increment touched no rows: {table}[{object_id}]");
                    Ok(ViewOutcome::Counted)
                }
                Ok(_) => Ok(ViewOutcome::Counted),
                Err(source) => Err(TrackError::Increment {
                    table: table.to_owned(),
                    object_id,
                    source,
                }),
            }
        } else {
            debug!("duplicate view within cooldown window: {key}");
            Ok(ViewOutcome::Duplicate)
        };

        // Recorded even when the increment failed or was skipped
        self.history.record(event);

        result
    }

    /// Number of visitor keys currently held in the recency store.
    pub fn tracked_keys(&self) -> usize {
        self.history.len()
    }
}
