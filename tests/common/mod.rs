#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the match sync integration tests.
//!
//! Provides a channel-driven [`MockTransport`], a scripted [`MockConnector`],
//! a recording [`MockApi`], a [`TokioTimeSource`] that follows tokio's
//! (pausable) clock, and builders for common server frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use matchday_sync::api::MatchApi;
use matchday_sync::protocol::{ClockCommand, ClockKind, JsonObject, MatchId};
use matchday_sync::time::TimeSource;
use matchday_sync::{Connector, SyncError, Transport};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Epoch milliseconds the tests pretend it is at tokio's start instant.
pub const T0: i64 = 1_700_000_000_000;

// ── MockTransport ───────────────────────────────────────────────────

/// Server side of a [`MockTransport`].
///
/// Frames pushed with [`push`](Self::push) are delivered by `recv()` in
/// order. Dropping the handle looks like the server closing the stream.
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Result<String, SyncError>>,
    /// Frames sent by the client.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn push(&self, frame: Value) {
        self.tx.send(Ok(frame.to_string())).unwrap();
    }

    pub fn push_text(&self, text: &str) {
        self.tx.send(Ok(text.to_owned())).unwrap();
    }

    pub fn fail(&self, reason: &str) {
        self.tx
            .send(Err(SyncError::TransportReceive(reason.to_owned())))
            .unwrap();
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

/// A channel-based mock transport for integration testing.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Result<String, SyncError>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a transport plus the handle that plays the server.
    pub fn new() -> (Self, ServerHandle) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, ServerHandle { tx, sent, closed })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out scripted transports in order, then refuses every attempt.
#[derive(Default)]
pub struct MockConnector {
    scripted: StdMutex<VecDeque<MockTransport>>,
    attempts: AtomicUsize,
    pub urls: StdMutex<Vec<String>>,
}

impl MockConnector {
    pub fn new(transports: Vec<MockTransport>) -> Arc<Self> {
        Arc::new(Self {
            scripted: StdMutex::new(transports.into()),
            ..Self::default()
        })
    }

    /// A connector with one transport, plus its server handle.
    pub fn single() -> (Arc<Self>, ServerHandle) {
        let (transport, server) = MockTransport::new();
        (Self::new(vec![transport]), server)
    }

    pub fn push(&self, transport: MockTransport) {
        self.scripted.lock().unwrap().push_back(transport);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SyncError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_owned());
        match self.scripted.lock().unwrap().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(SyncError::Connect("connection refused".into())),
        }
    }
}

// ── MockApi ─────────────────────────────────────────────────────────

/// A call recorded by [`MockApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Clock(MatchId, ClockKind, ClockCommand),
    MatchData(MatchId, JsonObject),
}

/// Records every call; optionally rejects them all.
#[derive(Default)]
pub struct MockApi {
    pub calls: StdMutex<Vec<ApiCall>>,
    pub reject: AtomicBool,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting() -> Arc<Self> {
        let api = Self::default();
        api.reject.store(true, Ordering::SeqCst);
        Arc::new(api)
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    fn outcome(&self) -> Result<(), SyncError> {
        if self.reject.load(Ordering::SeqCst) {
            Err(SyncError::Api {
                status: 500,
                message: "internal server error".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MatchApi for MockApi {
    async fn send_clock_command(
        &self,
        match_id: MatchId,
        kind: ClockKind,
        command: &ClockCommand,
    ) -> Result<(), SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push(ApiCall::Clock(match_id, kind, command.clone()));
        self.outcome()
    }

    async fn update_match_data(&self, match_id: MatchId, patch: &JsonObject) -> Result<(), SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push(ApiCall::MatchData(match_id, patch.clone()));
        self.outcome()
    }
}

// ── Time ────────────────────────────────────────────────────────────

/// Wall time derived from tokio's clock, so `start_paused` tests drive both
/// timers and epoch milliseconds together.
pub struct TokioTimeSource {
    origin: tokio::time::Instant,
}

impl TokioTimeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: tokio::time::Instant::now(),
        })
    }
}

impl TimeSource for TokioTimeSource {
    fn now_ms(&self) -> i64 {
        T0 + i64::try_from(self.origin.elapsed().as_millis()).unwrap()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Install a `tracing` subscriber honoring `RUST_LOG`. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks run. Under a paused clock this also auto-advances time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Poll `condition` until it holds, for at most `timeout` of tokio time.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn object(value: Value) -> JsonObject {
    match value {
        Value::Object(object) => object,
        other => panic!("expected a JSON object, got {other}"),
    }
}

// ── JSON frame builders ─────────────────────────────────────────────

pub fn ping_json(timestamp: i64) -> Value {
    json!({"type": "ping", "timestamp": timestamp})
}

pub fn initial_load_json(match_id: MatchId) -> Value {
    json!({
        "type": "initial-load",
        "match_id": match_id,
        "data": {
            "match": {"id": match_id, "title": "City Derby"},
            "match_data": {"score_team_a": 0, "score_team_b": 0, "period": "1st", "down": "1st", "distance": "10"},
            "teams": {
                "team_a": {"id": 1, "title": "Lions", "team_color": "#c00"},
                "team_b": {"id": 2, "title": "Bears", "team_color": "#00c"}
            },
            "players": [
                {"id": 10, "team_id": 1, "match_number": "12", "is_starting": true},
                {"id": 11, "team_id": 2, "match_number": "7", "is_starting": false}
            ],
            "events": [],
            "scoreboard_data": {"is_qtr": true, "is_time": true, "initial_time_mode": "max"},
            "gameclock": {"gameclock": 720, "gameclock_max": 720, "direction": "down", "gameclock_status": "stopped"},
            "playclock": {"playclock": 40, "playclock_max": 40, "direction": "down", "playclock_status": "stopped"}
        }
    })
}

pub fn match_data_update_json(fields: Value) -> Value {
    json!({"type": "match-update", "data": {"match_data": fields}})
}

pub fn clock_update_json(kind: ClockKind, clock: Value, timestamp: Option<i64>) -> Value {
    let mut frame = json!({"type": kind.update_type(), "data": {kind.field(): clock}});
    if let Some(timestamp) = timestamp {
        frame["timestamp"] = json!(timestamp);
    }
    frame
}

pub fn running_clock_json(kind: ClockKind, value: u32, started_at_ms: i64) -> Value {
    json!({
        kind.field(): value,
        "direction": "down",
        "status": "running",
        "started_at_ms": started_at_ms
    })
}
