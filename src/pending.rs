//! Pending Query Results
//!
//! The handoff point between a submitting thread (typically an HTTP handler
//! that will suspend its connection) and the queue worker that eventually
//! executes the query. The submitter registers a slot under the query's id,
//! submits, and blocks on the slot; the worker signals the slot exactly once
//! with either a successful or failed [`QueryResult`].
//!
//! Slots that are never signaled (submitter gave up, queue died) are swept
//! on the heartbeat cadence by [`PendingResultManager::cleanup_expired`] —
//! a TTL eviction, not an LRU-by-size policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::engine::QueryResult;

#[derive(Debug, Default)]
struct SlotState {
    result: Option<QueryResult>,
    completed: bool,
    timed_out: bool,
}

/// A wait slot for one in-flight query
#[derive(Debug)]
pub struct PendingQueryResult {
    pub query_id: String,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub timeout: Duration,
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl PendingQueryResult {
    fn new(query_id: &str, timeout: Duration) -> Self {
        PendingQueryResult {
            query_id: query_id.to_string(),
            submitted_at: chrono::Utc::now(),
            timeout,
            state: Mutex::new(SlotState::default()),
            ready: Condvar::new(),
        }
    }

    /// Block until the worker signals this slot or the slot's timeout
    /// elapses. Returns true on completion, false on timeout.
    pub fn wait(&self) -> bool {
        let deadline = std::time::Instant::now() + self.timeout;
        let mut state = self.state.lock();
        while !state.completed && !state.timed_out {
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                state.timed_out = true;
                warn!(query_id = %self.query_id, "timed out waiting for query result");
                break;
            }
        }
        state.completed
    }

    /// Take the delivered result, if the slot completed
    pub fn take_result(&self) -> Option<QueryResult> {
        let mut state = self.state.lock();
        if state.completed {
            state.result.take()
        } else {
            None
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub fn is_timed_out(&self) -> bool {
        self.state.lock().timed_out
    }

    /// Deliver a result. Only the first delivery lands; later attempts are
    /// refused so a slot can never be signaled twice.
    fn signal(&self, result: QueryResult) -> bool {
        let mut state = self.state.lock();
        if state.completed {
            return false;
        }
        state.result = Some(result);
        state.completed = true;
        self.ready.notify_all();
        true
    }

    fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.submitted_at);
        elapsed.num_seconds() >= self.timeout.as_secs() as i64
    }
}

/// Registry of wait slots, keyed by query id
#[derive(Debug, Default)]
pub struct PendingResultManager {
    slots: DashMap<String, Arc<PendingQueryResult>>,
    /// Total signals delivered (success + failure), for instrumentation
    signals_delivered: AtomicU64,
    /// Signals refused because the slot was already completed
    signals_refused: AtomicU64,
}

impl PendingResultManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for a query about to be submitted. Re-registering an
    /// id replaces the old slot (the old waiter, if any, is left to time out).
    pub fn register(&self, query_id: &str, timeout: Duration) -> Arc<PendingQueryResult> {
        let pending = Arc::new(PendingQueryResult::new(query_id, timeout));
        self.slots.insert(query_id.to_string(), Arc::clone(&pending));
        debug!(query_id, "pending result registered");
        pending
    }

    /// Deliver a result to the slot registered under `query_id`. The slot is
    /// removed from the registry either way; at most one delivery succeeds
    /// per slot. Returns false if no waiter existed or the slot was already
    /// completed.
    pub fn signal(&self, query_id: &str, result: QueryResult) -> bool {
        let Some((_, pending)) = self.slots.remove(query_id) else {
            warn!(query_id, "no pending slot to signal");
            return false;
        };

        if pending.signal(result) {
            self.signals_delivered.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.signals_refused.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Sweep slots whose TTL elapsed or that already timed out.
    /// Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = chrono::Utc::now();
        let before = self.slots.len();
        self.slots
            .retain(|_, pending| !pending.is_expired(now) && !pending.is_timed_out());
        before - self.slots.len()
    }

    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    pub fn signals_delivered(&self) -> u64 {
        self.signals_delivered.load(Ordering::Relaxed)
    }

    pub fn signals_refused(&self) -> u64 {
        self.signals_refused.load(Ordering::Relaxed)
    }
}
