//! Session supervisor: connect, detect loss, reconnect on a fixed interval.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──handshake ok──▶ Open
//!      ▲                      │                          │
//!      └──── retry tick ◀─────┴──── handshake failed     │
//!      └──────────────────── transport error / close ◀───┘
//! ```
//!
//! The supervisor owns the correlation table and the identifier generator
//! and hands both to every session generation. Retries use one fixed
//! interval with no backoff and no attempt cap. Nothing is replayed after a
//! reconnect; callers watch [`Supervisor::watch_state`] and re-subscribe.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tickwire_core::codec;
use tickwire_core::{CallError, CallIdGenerator, CallOutcome, Topic};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::duration_ms;
use crate::session::{PendingReply, Session, SessionContext, SubscribeOutcome};
use crate::state::{ConnectionState, SessionState};
use crate::table::{CorrelationTable, Listener};

/// Keeps one session alive and routes caller requests to it.
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<ClientConfig>,
    table: Arc<CorrelationTable>,
    ids: Arc<CallIdGenerator>,
    current: RwLock<Option<Arc<Session>>>,
    state_tx: watch::Sender<ConnectionState>,
    generation: AtomicU64,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Create a stopped supervisor.
    pub fn new(config: ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                table: Arc::new(CorrelationTable::new()),
                ids: Arc::new(CallIdGenerator::new()),
                current: RwLock::new(None),
                state_tx,
                generation: AtomicU64::new(0),
                running: Mutex::new(None),
            }),
        }
    }

    /// Start the connect/reconnect loop. No-op while already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.inner.running.lock();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!("supervisor already running");
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone()));
        *running = Some(Running { cancel, task });
    }

    /// Stop reconnecting and close the current session.
    ///
    /// Pending calls fail with `ConnectionLost`. Idempotent.
    pub async fn stop(&self) {
        let running = self.inner.running.lock().take();
        if let Some(Running { cancel, task }) = running {
            cancel.cancel();
            if let Err(error) = task.await {
                warn!(%error, "supervisor task failed");
            }
        }

        let session = self.inner.current.write().take();
        if let Some(session) = session {
            session.close().await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        info!(endpoint = %self.inner.config.endpoint, "supervisor stopped");
    }

    /// Whether the reconnect loop is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    // ─── State ───────────────────────────────────────────────────────────

    /// Current connectivity.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the state is `Open`. Returns `false` on timeout.
    pub async fn wait_until_open(&self, timeout: Duration) -> bool {
        let mut rx = self.watch_state();
        tokio::time::timeout(timeout, rx.wait_for(|state| state.is_open()))
            .await
            .is_ok_and(|changed| changed.is_ok())
    }

    /// Generation number of the most recent connection attempt.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Shared correlation table, for introspection.
    pub fn table(&self) -> &CorrelationTable {
        &self.inner.table
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Issue a correlated request on the current session.
    pub async fn dispatch(&self, body: Value) -> Result<PendingReply, CallError> {
        let session = self.inner.current().ok_or(CallError::NotConnected)?;
        session.dispatch(body).await
    }

    /// Issue a correlated request and wait for its outcome.
    pub async fn send(&self, body: Value) -> CallOutcome {
        self.dispatch(body).await?.wait().await
    }

    /// Register a listener and send the subscription request if open.
    ///
    /// With no live session the listener is still registered and
    /// [`SubscribeOutcome::Deferred`] is returned.
    pub async fn send_subscribe(
        &self,
        topic: impl Into<Topic>,
        body: Value,
        listener: Listener,
    ) -> Result<SubscribeOutcome, CallError> {
        let topic = topic.into();
        match self.inner.current() {
            Some(session) => session.send_subscribe(topic, body, listener).await,
            None => {
                codec::ensure_object(&body)?;
                let _ = self.inner.table.subscribe(topic.clone(), listener);
                debug!(topic = %topic, "no session, subscription deferred");
                Ok(SubscribeOutcome::Deferred)
            }
        }
    }

    /// Remove the local listener for a topic.
    ///
    /// Nothing is sent; venue-side cancellation is a normal call.
    pub fn unsubscribe(&self, topic: &Topic) -> bool {
        self.inner.table.unsubscribe(topic)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(running) = self.inner.running.lock().take() {
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

// ─── Reconnect loop ─────────────────────────────────────────────────────────

impl Inner {
    fn current(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state changed");
        }
    }

    /// Clear the table if a lost session ended without its own teardown.
    fn ensure_cleared(&self, session: &Session) {
        if session.state() == SessionState::Closed {
            return;
        }
        let report = self.table.clear();
        warn!(
            generation = session.generation(),
            calls_faulted = report.calls_faulted,
            subscriptions_dropped = report.subscriptions_dropped,
            "session ended without teardown, table cleared"
        );
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let endpoint = self.config.endpoint.as_str();
        let retry_ms = duration_ms(self.config.reconnect_interval);
        info!(endpoint, retry_ms, "supervisor started");

        loop {
            self.set_state(ConnectionState::Connecting);
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let ctx = SessionContext {
                config: Arc::clone(&self.config),
                table: Arc::clone(&self.table),
                ids: Arc::clone(&self.ids),
                generation,
            };

            let opened = tokio::select! {
                () = cancel.cancelled() => break,
                result = Session::open(endpoint, ctx) => result,
            };

            match opened {
                Ok(session) => {
                    let session = Arc::new(session);
                    {
                        // State and session change together so a caller that
                        // sees Open also sees the session.
                        let mut current = self.current.write();
                        *current = Some(Arc::clone(&session));
                        self.set_state(ConnectionState::Open);
                    }

                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = session.closed() => {
                            warn!(endpoint, generation, retry_ms, "connection lost");
                            self.ensure_cleared(&session);
                        }
                    }

                    {
                        let mut current = self.current.write();
                        *current = None;
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
                Err(error) => {
                    warn!(endpoint, generation, %error, retry_ms, "connection attempt failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.reconnect_interval) => {}
            }
        }

        debug!(endpoint, "supervisor loop exited");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
