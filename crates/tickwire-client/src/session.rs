//! Connection session: one WebSocket generation and its receive loop.
//!
//! A [`Session`] exists only once the handshake has succeeded. It owns the
//! outbound frame queue and a single loop task that holds both halves of the
//! socket and `select!`s over cancellation, queued frames, and inbound
//! messages. Inbound frames are therefore routed one at a time in arrival
//! order.
//!
//! Every loop exit runs the same teardown, including a panic unwinding out
//! of the loop task: the outbound queue is closed, the correlation table is
//! cleared, and the state moves to [`SessionState::Closed`].

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tickwire_core::codec::{self, InboundFrame, Routing};
use tickwire_core::{CallError, CallId, CallIdGenerator, CallOutcome, CodecError, Topic};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::duration_ms;
use crate::errors::{ClientError, Result};
use crate::state::SessionState;
use crate::table::{CorrelationTable, Listener};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Characters of a malformed frame kept in the warning log.
const PREVIEW_CHARS: usize = 120;

/// Shared state a session is opened with.
///
/// The table and identifier generator outlive any single session; the
/// supervisor hands the same instances to every generation it opens.
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// Timeouts, buffer size and routing rules.
    pub config: Arc<ClientConfig>,
    /// Pending calls and subscriptions.
    pub table: Arc<CorrelationTable>,
    /// Call identifier source.
    pub ids: Arc<CallIdGenerator>,
    /// Generation number, for logs.
    pub generation: u64,
}

impl SessionContext {
    /// A standalone context with a fresh table and generator.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            table: Arc::new(CorrelationTable::new()),
            ids: Arc::new(CallIdGenerator::new()),
            generation: 1,
        }
    }
}

/// Result of a subscribe request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Listener registered and the subscription frame was written.
    Sent,
    /// Listener registered but nothing was sent; re-issue after reconnect.
    Deferred,
}

/// Handle to one in-flight call.
///
/// Dropping it does not cancel the call; the entry stays in the table until
/// a reply, its timeout, or teardown.
#[derive(Debug)]
pub struct PendingReply {
    id: CallId,
    rx: oneshot::Receiver<CallOutcome>,
}

impl PendingReply {
    /// Identifier assigned to the call.
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Wait for the single outcome of the call.
    pub async fn wait(self) -> CallOutcome {
        let id = self.id;
        self.rx
            .await
            .unwrap_or_else(|_| Err(CallError::ConnectionLost { id }))
    }
}

/// One established WebSocket connection.
pub struct Session {
    generation: u64,
    endpoint: String,
    config: Arc<ClientConfig>,
    table: Arc<CorrelationTable>,
    ids: Arc<CallIdGenerator>,
    frame_tx: mpsc::Sender<String>,
    state_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Perform the handshake and start the receive loop.
    ///
    /// The handshake is bounded by `connect_timeout`. On failure no session
    /// exists and nothing in the table is touched.
    pub async fn open(endpoint: &str, ctx: SessionContext) -> Result<Self> {
        let url = parse_endpoint(endpoint)?;
        let generation = ctx.generation;
        let timeout = ctx.config.connect_timeout;
        debug!(endpoint, generation, state = ?SessionState::Connecting, "opening session");

        let (ws, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                endpoint: endpoint.to_string(),
                timeout_ms: duration_ms(timeout),
            })?
            .map_err(|e| ClientError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let (frame_tx, frame_rx) = mpsc::channel(ctx.config.outbound_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::Open);
        let cancel = CancellationToken::new();

        let receive = ReceiveLoop {
            generation,
            routing: ctx.config.routing.clone(),
            table: Arc::clone(&ctx.table),
        };
        let teardown = Teardown::new(generation, Arc::clone(&ctx.table), state_tx, frame_rx);
        let handler = tokio::spawn(receive.run(ws, teardown, cancel.clone()));

        info!(endpoint, generation, "session open");

        Ok(Self {
            generation,
            endpoint: endpoint.to_string(),
            config: ctx.config,
            table: ctx.table,
            ids: ctx.ids,
            frame_tx,
            state_rx,
            cancel,
            handler: Mutex::new(Some(handler)),
        })
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Generation number assigned by the owner.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Endpoint this session is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Issue a correlated request and return a handle to its reply.
    ///
    /// Fails with [`CallError::NotConnected`] unless the session is open, and
    /// with [`CallError::InvalidBody`] unless `body` is a JSON object. Neither
    /// failure consumes an identifier.
    pub async fn dispatch(&self, body: Value) -> std::result::Result<PendingReply, CallError> {
        if self.state() != SessionState::Open {
            return Err(CallError::NotConnected);
        }
        codec::ensure_object(&body)?;

        let id = self.ids.next_id();
        let frame = codec::encode_request(body, id, &self.config.routing)?;
        let (tx, rx) = oneshot::channel();
        self.table
            .register(id, tx)
            .map_err(|e| CallError::Internal(e.to_string()))?;
        self.arm_timer(id);

        if self.frame_tx.send(frame).await.is_err() {
            let _ = self.table.fail(id, CallError::ConnectionLost { id });
        } else {
            trace!(call_id = %id, generation = self.generation, "request queued");
        }

        Ok(PendingReply { id, rx })
    }

    /// Issue a correlated request and wait for its outcome.
    pub async fn send(&self, body: Value) -> CallOutcome {
        self.dispatch(body).await?.wait().await
    }

    /// Register `listener` for `topic`, then write `body` if open.
    ///
    /// The listener is registered even when nothing can be sent.
    pub async fn send_subscribe(
        &self,
        topic: Topic,
        body: Value,
        listener: Listener,
    ) -> std::result::Result<SubscribeOutcome, CallError> {
        codec::ensure_object(&body)?;
        let _ = self.table.subscribe(topic.clone(), listener);

        if self.state() != SessionState::Open {
            debug!(topic = %topic, "session not open, subscription deferred");
            return Ok(SubscribeOutcome::Deferred);
        }
        let frame = codec::encode_frame(body)?;
        if self.frame_tx.send(frame).await.is_err() {
            debug!(topic = %topic, "writer gone, subscription deferred");
            return Ok(SubscribeOutcome::Deferred);
        }
        Ok(SubscribeOutcome::Sent)
    }

    fn arm_timer(&self, id: CallId) {
        let table = Arc::clone(&self.table);
        let after = self.config.call_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if table.expire(id, after) {
                warn!(call_id = %id, timeout_ms = duration_ms(after), "call timed out");
            }
        });
        self.table.attach_timer(id, timer.abort_handle());
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Close the connection and wait for teardown to finish.
    ///
    /// Pending calls are faulted with `ConnectionLost`. Safe to call more
    /// than once.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handler = self.handler.lock().take();
        match handler {
            Some(handle) => {
                if let Err(error) = handle.await {
                    warn!(generation = self.generation, %error, "session task failed");
                }
            }
            None => self.closed().await,
        }
    }

    /// Completes once the receive loop has exited and teardown is done.
    pub async fn closed(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─── Receive loop ───────────────────────────────────────────────────────────

struct ReceiveLoop {
    generation: u64,
    routing: Routing,
    table: Arc<CorrelationTable>,
}

impl ReceiveLoop {
    async fn run(self, ws: WsStream, mut teardown: Teardown, cancel: CancellationToken) {
        let generation = self.generation;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break "closed by client";
                }
                frame = teardown.frame_rx.recv() => {
                    let Some(frame) = frame else { break "session dropped" };
                    if let Err(error) = ws_tx.send(Message::Text(frame.into())).await {
                        warn!(generation, %error, "write failed");
                        break "write failed";
                    }
                }
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.route_text(&text),
                    Some(Ok(Message::Binary(bytes))) => self.route_binary(&bytes),
                    Some(Ok(Message::Close(frame))) => {
                        debug!(generation, ?frame, "close frame received");
                        break "closed by peer";
                    }
                    // Ping/pong are answered by the transport.
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(generation, %error, "transport error");
                        break "transport error";
                    }
                    None => break "stream ended",
                },
            }
        };
        teardown.reason = reason;
    }

    fn route_text(&self, text: &str) {
        match codec::decode(text, &self.routing) {
            Ok(frame) => self.route(frame),
            Err(error) => self.drop_malformed(&error, text),
        }
    }

    fn route_binary(&self, bytes: &[u8]) {
        match codec::decode_binary(bytes, &self.routing) {
            Ok(frame) => self.route(frame),
            Err(error) => self.drop_malformed(&error, &String::from_utf8_lossy(bytes)),
        }
    }

    fn route(&self, frame: InboundFrame) {
        if !frame.is_routable() {
            trace!(generation = self.generation, "frame matched no route");
            return;
        }

        if let Some(topic) = &frame.topic {
            let payload = Value::Object(frame.body.clone());
            if !self.table.dispatch_topic(topic, payload) {
                trace!(topic = %topic, "no listener for push");
            }
        }

        if let Some(id) = frame.call_id {
            let reply = frame.into_reply(&self.routing);
            if !self.table.resolve(id, reply) {
                debug!(call_id = %id, "reply for unknown or expired call dropped");
            }
        }
    }

    fn drop_malformed(&self, error: &CodecError, text: &str) {
        warn!(
            generation = self.generation,
            %error,
            preview = %preview(text),
            "dropping malformed frame"
        );
    }
}

/// Session teardown, run when the receive loop task finishes or unwinds.
struct Teardown {
    generation: u64,
    table: Arc<CorrelationTable>,
    state_tx: watch::Sender<SessionState>,
    frame_rx: mpsc::Receiver<String>,
    reason: &'static str,
}

impl Teardown {
    fn new(
        generation: u64,
        table: Arc<CorrelationTable>,
        state_tx: watch::Sender<SessionState>,
        frame_rx: mpsc::Receiver<String>,
    ) -> Self {
        Self {
            generation,
            table,
            state_tx,
            frame_rx,
            reason: "receive loop aborted",
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        // Close first so a dispatch racing with teardown fails fast.
        self.frame_rx.close();
        let report = self.table.clear();
        let _ = self.state_tx.send_replace(SessionState::Closed);
        info!(
            generation = self.generation,
            reason = self.reason,
            calls_faulted = report.calls_faulted,
            subscriptions_dropped = report.subscriptions_dropped,
            "session closed"
        );
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("scheme must be ws or wss, got {other}"),
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;
    use tickwire_core::logging::capture_logs;
    use tokio::sync::oneshot::error::TryRecvError;

    fn receive_loop() -> (ReceiveLoop, Arc<CorrelationTable>) {
        let table = Arc::new(CorrelationTable::new());
        let receive = ReceiveLoop {
            generation: 1,
            routing: Routing::default(),
            table: Arc::clone(&table),
        };
        (receive, table)
    }

    fn register(table: &CorrelationTable, id: u64) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        table.register(CallId::new(id), tx).unwrap();
        rx
    }

    fn collecting(table: &CorrelationTable, topic: &str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = table.subscribe(Topic::from(topic), Arc::new(move |v| sink.lock().push(v)));
        seen
    }

    // ── routing ─────────────────────────────────────────────────────

    #[test]
    fn reply_resolves_with_id_stripped() {
        let (receive, table) = receive_loop();
        let mut rx = register(&table, 7);
        receive.route_text(r#"{"req_id": 7, "val": 5}"#);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"val": 5}));
    }

    #[test]
    fn error_reply_resolves_as_fault() {
        let (receive, table) = receive_loop();
        let mut rx = register(&table, 3);
        receive.route_text(r#"{"req_id": 3, "error": {"code": "Denied", "message": "no"}}"#);
        assert_matches!(
            rx.try_recv().unwrap(),
            Err(CallError::BusinessFault(f)) if f.code.as_deref() == Some("Denied")
        );
    }

    #[test]
    fn push_routes_to_topic_listener() {
        let (receive, table) = receive_loop();
        let seen = collecting(&table, "quote");
        receive.route_text(r#"{"topic": "quote", "price": 1.5}"#);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0]["price"], 1.5);
    }

    #[test]
    fn tick_stream_routes_to_symbol_topic() {
        let (receive, table) = receive_loop();
        let seen = collecting(&table, "tick_R_100");
        receive.route_text(r#"{"tick": {"symbol": "R_100", "quote": 1234.5}}"#);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn frame_with_id_and_topic_routes_both() {
        let (receive, table) = receive_loop();
        let mut rx = register(&table, 9);
        let seen = collecting(&table, "tick_R_50");
        receive.route_text(r#"{"req_id": 9, "tick": {"symbol": "R_50", "quote": 1.0}}"#);
        assert!(rx.try_recv().unwrap().is_ok());
        assert_eq!(seen.lock().len(), 1);
        assert!(seen.lock()[0].get("req_id").is_some());
    }

    #[test]
    fn binary_frame_decoded_as_text() {
        let (receive, table) = receive_loop();
        let mut rx = register(&table, 4);
        receive.route_binary(br#"{"req_id": 4, "ok": true}"#);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"ok": true}));
    }

    #[test]
    fn unknown_reply_is_dropped() {
        let (receive, table) = receive_loop();
        let mut rx = register(&table, 1);
        receive.route_text(r#"{"req_id": 2}"#);
        assert_matches!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(table.is_pending(CallId::new(1)));
    }

    #[test]
    fn malformed_frame_logged_and_dropped() {
        let (logs, _guard) = capture_logs();
        let (receive, table) = receive_loop();
        let _rx = register(&table, 1);

        receive.route_text("not json{");
        receive.route_binary(&[0xff, 0xfe]);

        assert!(logs.has_event(tracing::Level::WARN, "dropping malformed frame"));
        assert_eq!(logs.count_at_level(tracing::Level::WARN), 2);
        assert_eq!(table.pending_count(), 1);
    }

    // ── teardown ────────────────────────────────────────────────────

    fn faulty_listener(_: Value) {
        panic!("listener bug");
    }

    fn teardown(table: &Arc<CorrelationTable>) -> (Teardown, watch::Receiver<SessionState>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Open);
        let (_frame_tx, frame_rx) = mpsc::channel(1);
        (Teardown::new(1, Arc::clone(table), state_tx, frame_rx), state_rx)
    }

    #[test]
    fn teardown_runs_when_loop_unwinds() {
        let table = Arc::new(CorrelationTable::new());
        let mut rx = register(&table, 1);
        let _ = table.subscribe(Topic::from("quote"), Arc::new(|_| {}));
        let (guard, state_rx) = teardown(&table);

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("receive loop bug");
        }));

        assert!(unwound.is_err());
        assert_eq!(*state_rx.borrow(), SessionState::Closed);
        assert_matches!(rx.try_recv().unwrap(), Err(CallError::ConnectionLost { .. }));
        assert_eq!(table.subscription_count(), 0);
    }

    #[tokio::test]
    async fn teardown_closes_outbound_queue() {
        let table = Arc::new(CorrelationTable::new());
        let (state_tx, _state_rx) = watch::channel(SessionState::Open);
        let (frame_tx, frame_rx) = mpsc::channel(1);
        drop(Teardown::new(1, table, state_tx, frame_rx));
        assert!(frame_tx.send("{}".to_string()).await.is_err());
    }

    #[test]
    fn panicking_listener_does_not_stop_routing() {
        let (receive, table) = receive_loop();
        let _ = table.subscribe(Topic::from("boom"), Arc::new(faulty_listener));
        let seen = collecting(&table, "quote");
        let mut rx = register(&table, 2);

        receive.route_text(r#"{"topic": "boom"}"#);
        receive.route_text(r#"{"topic": "quote", "price": 3.0}"#);
        receive.route_text(r#"{"req_id": 2, "ok": true}"#);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"ok": true}));
    }

    // ── helpers ─────────────────────────────────────────────────────

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn endpoint_requires_ws_scheme() {
        assert!(parse_endpoint("ws://127.0.0.1:9000").is_ok());
        assert!(parse_endpoint("wss://example.com/ws?app_id=1").is_ok());
        assert_matches!(
            parse_endpoint("https://example.com"),
            Err(ClientError::InvalidEndpoint { reason, .. }) if reason.contains("https")
        );
        assert_matches!(
            parse_endpoint("nope"),
            Err(ClientError::InvalidEndpoint { .. })
        );
    }

    #[tokio::test]
    async fn pending_reply_reports_lost_when_sender_dropped() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let reply = PendingReply {
            id: CallId::new(5),
            rx,
        };
        assert_eq!(reply.id(), CallId::new(5));
        assert_matches!(reply.wait().await, Err(CallError::ConnectionLost { .. }));
    }

    // ── open ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn open_refused_port_fails_with_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let ctx = SessionContext::new(ClientConfig::for_endpoint(format!("ws://{addr}")));
        let err = Session::open(&format!("ws://{addr}"), ctx).await.unwrap_err();
        assert_matches!(err, ClientError::Connect { .. });
    }

    #[tokio::test]
    async fn open_silent_server_times_out() {
        // Accepts TCP but never answers the upgrade request.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = ClientConfig::for_endpoint(format!("ws://{addr}"))
            .with_connect_timeout(Duration::from_millis(150));
        let ctx = SessionContext::new(config);
        let err = Session::open(&format!("ws://{addr}"), ctx).await.unwrap_err();
        assert_matches!(err, ClientError::ConnectTimeout { timeout_ms: 150, .. });
    }

    #[tokio::test]
    async fn open_invalid_endpoint_fails_fast() {
        let ctx = SessionContext::new(ClientConfig::default());
        let err = Session::open("http://example.com", ctx).await.unwrap_err();
        assert_matches!(err, ClientError::InvalidEndpoint { .. });
    }
}
