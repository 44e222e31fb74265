//! Correlation table: pending calls by [`CallId`], listeners by [`Topic`].
//!
//! The table is the single synchronization point shared by the receive loop,
//! the public send/subscribe API, and the per-call timers. Every operation
//! takes one `parking_lot` mutex; completion senders and listeners are
//! always invoked after the lock is released.
//!
//! A pending call is removed from the map *before* its completion fires, so
//! whichever of [`resolve`](CorrelationTable::resolve),
//! [`expire`](CorrelationTable::expire), [`fail`](CorrelationTable::fail) or
//! [`clear`](CorrelationTable::clear) gets there first is the only one with
//! an observable effect.
//!
//! [`clear`](CorrelationTable::clear) drops every subscription as well as
//! every pending call. Subscriptions never survive a session teardown;
//! callers re-subscribe after reconnecting.
//!
//! A call may carry the abort handle of its expiry timer. The timer is
//! aborted as soon as the call leaves the table, however it leaves.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tickwire_core::{BusinessFault, CallError, CallId, CallOutcome, Topic};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::duration_ms;

/// Callback invoked with every push payload for a topic.
///
/// Runs on the receive loop; it must not block. A panic is caught and
/// logged, and the payload is lost.
pub type Listener = Arc<dyn Fn(Value) + Send + Sync>;

/// Single-fire completion handle for one call.
pub type Completion = oneshot::Sender<CallOutcome>;

/// Table misuse errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// The identifier is already pending.
    #[error("call identifier {0} is already pending")]
    DuplicateIdentifier(CallId),
}

/// What a [`CorrelationTable::clear`] removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Pending calls faulted with `ConnectionLost`.
    pub calls_faulted: usize,
    /// Subscriptions removed.
    pub subscriptions_dropped: usize,
}

struct PendingCall {
    completion: Completion,
    created_at: Instant,
    timer: Option<AbortHandle>,
}

impl PendingCall {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct Entries {
    pending: HashMap<CallId, PendingCall>,
    subscriptions: HashMap<Topic, Listener>,
}

/// Pending calls and subscriptions behind one lock.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<Entries>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Pending calls ───────────────────────────────────────────────────

    /// Store a pending call.
    pub fn register(&self, id: CallId, completion: Completion) -> Result<(), TableError> {
        let mut entries = self.entries.lock();
        if entries.pending.contains_key(&id) {
            return Err(TableError::DuplicateIdentifier(id));
        }
        let _ = entries.pending.insert(
            id,
            PendingCall {
                completion,
                created_at: Instant::now(),
                timer: None,
            },
        );
        Ok(())
    }

    /// Attach the expiry timer of a pending call.
    ///
    /// If the call has already left the table the timer is aborted at once.
    pub fn attach_timer(&self, id: CallId, timer: AbortHandle) {
        match self.entries.lock().pending.get_mut(&id) {
            Some(call) => call.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Deliver a reply. Returns `false` if the call was already resolved.
    pub fn resolve(&self, id: CallId, reply: Result<Value, BusinessFault>) -> bool {
        let Some(call) = self.take(id) else {
            trace!(call_id = %id, "reply for unknown call dropped");
            return false;
        };
        let elapsed_ms = duration_ms(call.created_at.elapsed());
        debug!(call_id = %id, elapsed_ms, fault = reply.is_err(), "call resolved");
        let _ = call
            .completion
            .send(reply.map_err(CallError::BusinessFault));
        true
    }

    /// Fault a call with `Timeout`. Returns `false` if it was already resolved.
    pub fn expire(&self, id: CallId, after: Duration) -> bool {
        let Some(call) = self.take(id) else {
            return false;
        };
        let timeout_ms = duration_ms(after);
        debug!(call_id = %id, timeout_ms, "call expired");
        let _ = call
            .completion
            .send(Err(CallError::Timeout { id, timeout_ms }));
        true
    }

    /// Fault a call with an arbitrary error. Returns `false` if it was
    /// already resolved.
    pub fn fail(&self, id: CallId, error: CallError) -> bool {
        let Some(call) = self.take(id) else {
            return false;
        };
        debug!(call_id = %id, error = %error, "call failed");
        let _ = call.completion.send(Err(error));
        true
    }

    fn take(&self, id: CallId) -> Option<PendingCall> {
        let mut call = self.entries.lock().pending.remove(&id)?;
        call.disarm();
        Some(call)
    }

    // ─── Subscriptions ───────────────────────────────────────────────────

    /// Set the listener for a topic. Returns `true` if one was replaced.
    pub fn subscribe(&self, topic: Topic, listener: Listener) -> bool {
        let replaced = self
            .entries
            .lock()
            .subscriptions
            .insert(topic.clone(), listener)
            .is_some();
        debug!(topic = %topic, replaced, "listener registered");
        replaced
    }

    /// Remove the listener for a topic. Returns `true` if one existed.
    pub fn unsubscribe(&self, topic: &Topic) -> bool {
        self.entries.lock().subscriptions.remove(topic).is_some()
    }

    /// Hand a push payload to the topic's listener, if any.
    ///
    /// Payloads without a listener are dropped, not buffered.
    pub fn dispatch_topic(&self, topic: &Topic, payload: Value) -> bool {
        let listener = self.entries.lock().subscriptions.get(topic).cloned();
        match listener {
            Some(listener) => {
                if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                    warn!(topic = %topic, "listener panicked, payload dropped");
                }
                true
            }
            None => {
                trace!(topic = %topic, "push without listener dropped");
                false
            }
        }
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Fault every pending call with `ConnectionLost` and drop every
    /// subscription.
    pub fn clear(&self) -> ClearReport {
        let (pending, subscriptions) = {
            let mut entries = self.entries.lock();
            (
                std::mem::take(&mut entries.pending),
                std::mem::take(&mut entries.subscriptions),
            )
        };
        let report = ClearReport {
            calls_faulted: pending.len(),
            subscriptions_dropped: subscriptions.len(),
        };
        for (id, mut call) in pending {
            call.disarm();
            let _ = call.completion.send(Err(CallError::ConnectionLost { id }));
        }
        report
    }

    // ─── Introspection ───────────────────────────────────────────────────

    /// Number of calls awaiting resolution.
    pub fn pending_count(&self) -> usize {
        self.entries.lock().pending.len()
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.entries.lock().subscriptions.len()
    }

    /// Whether a call is still pending.
    pub fn is_pending(&self, id: CallId) -> bool {
        self.entries.lock().pending.contains_key(&id)
    }

    /// Whether a topic has a listener.
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.entries.lock().subscriptions.contains_key(topic)
    }

    /// Age of the longest-waiting pending call.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.entries
            .lock()
            .pending
            .values()
            .map(|call| call.created_at.elapsed())
            .max()
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("CorrelationTable")
            .field("pending", &entries.pending.len())
            .field("subscriptions", &entries.subscriptions.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
