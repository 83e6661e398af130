//! Connection lifecycle for the match event stream.
//!
//! A [`ConnectionManager`] owns at most one live transport at a time. It
//! opens `"{base_url}/ws/matches/{match_id}/{client_id}"` through an
//! injected [`Connector`], forwards every inbound text frame on a bounded
//! channel, and reconnects with backoff after an unintentional drop.
//!
//! Every connect attempt gets a fresh generation number. Background tasks
//! (the transport loop and reconnect timers) carry the generation they were
//! spawned for and only touch shared state while it is still current, so a
//! superseded task can never resurrect an old connection.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::lock;
use crate::protocol::MatchId;
use crate::slot::Slot;
use crate::transport::{Connector, Transport};

/// Heartbeats older than this degrade the quality to [`ConnectionQuality::Poor`].
pub const HEARTBEAT_STALE_MS: i64 = 30_000;

const GOOD_ROUND_TRIP_MS: u32 = 200;
const FAIR_ROUND_TRIP_MS: u32 = 500;

/// Lifecycle state of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last transport failed; a reconnect may be pending.
    Error,
}

/// Coarse health indicator for status badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Good,
    Fair,
    Poor,
    Disconnected,
}

impl ConnectionQuality {
    /// Classify a connection from its state, the last measured round trip
    /// and the age of the last heartbeat.
    pub fn classify(
        state: ConnectionState,
        round_trip_ms: Option<u32>,
        last_ping_at_ms: Option<i64>,
        now_ms: i64,
    ) -> Self {
        if state != ConnectionState::Connected {
            return ConnectionQuality::Disconnected;
        }
        if last_ping_at_ms.is_some_and(|at| now_ms.saturating_sub(at) > HEARTBEAT_STALE_MS) {
            return ConnectionQuality::Poor;
        }
        match round_trip_ms {
            None => ConnectionQuality::Good,
            Some(rtt) if rtt < GOOD_ROUND_TRIP_MS => ConnectionQuality::Good,
            Some(rtt) if rtt < FAIR_ROUND_TRIP_MS => ConnectionQuality::Fair,
            Some(_) => ConnectionQuality::Poor,
        }
    }
}

/// One inbound text frame tagged with the match it arrived for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub match_id: MatchId,
    pub text: String,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    /// Set by `disconnect`; cleared by `connect`.
    intentional: bool,
    task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Inner {
    /// Abort everything tied to the current generation.
    fn abort_all(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.outbound = None;
        self.shutdown = None;
    }
}

struct Shared {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    client_id: Uuid,
    state: Slot<ConnectionState>,
    last_error: Slot<Option<String>>,
    retry_count: Slot<u32>,
    target: Slot<Option<MatchId>>,
    frame_tx: mpsc::Sender<InboundText>,
    inner: Mutex<Inner>,
}

/// Connect / reconnect / disconnect state machine for one view.
///
/// Created via [`ConnectionManager::new`], which also returns the receiver
/// for inbound frames. Frames arrive in transport order.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create an idle manager and the receiver for its inbound frames.
    ///
    /// A client id is generated here and stays fixed for the lifetime of
    /// the manager.
    #[must_use = "the frame receiver must be used to receive frames"]
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::Receiver<InboundText>) {
        // tokio panics on a zero-capacity channel.
        let (frame_tx, frame_rx) = mpsc::channel(config.frame_channel_capacity.max(1));
        let shared = Arc::new(Shared {
            config,
            connector,
            client_id: Uuid::new_v4(),
            state: Slot::new("connection_state", ConnectionState::Disconnected),
            last_error: Slot::new("last_error", None),
            retry_count: Slot::new("retry_count", 0),
            target: Slot::new("target", None),
            frame_tx,
            inner: Mutex::new(Inner::default()),
        });
        (Self { shared }, frame_rx)
    }

    /// Open the stream for `target`.
    ///
    /// A no-op while already connected or connecting to the same target.
    /// Otherwise any existing transport and pending reconnect are torn down
    /// and a fresh attempt starts with the retry counter at zero.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, target: MatchId) {
        let shared = &self.shared;
        let mut inner = lock(&shared.inner);
        let state = shared.state.get();
        if shared.target.get() == Some(target)
            && matches!(state, ConnectionState::Connected | ConnectionState::Connecting)
        {
            debug!(match_id = target, ?state, "already attached to match, ignoring connect");
            return;
        }

        inner.abort_all();
        inner.intentional = false;
        inner.generation = inner.generation.wrapping_add(1);
        shared.target.set(Some(target));
        shared.retry_count.set(0);
        shared.state.set(ConnectionState::Connecting);
        spawn_connection(shared, &mut inner, target);
    }

    /// Close the stream on purpose.
    ///
    /// Cancels any pending reconnect, closes the transport gracefully within
    /// the configured shutdown timeout (aborting it afterwards), and leaves
    /// the state at [`ConnectionState::Disconnected`]. Idempotent.
    pub async fn disconnect(&self) {
        let (task, shutdown) = {
            let mut inner = lock(&self.shared.inner);
            inner.intentional = true;
            inner.generation = inner.generation.wrapping_add(1);
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.abort();
            }
            inner.outbound = None;
            self.shared.state.set(ConnectionState::Disconnected);
            (inner.task.take(), inner.shutdown.take())
        };
        debug!(match_id = ?self.shared.target.get(), "disconnect requested");

        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        if let Some(mut task) = task {
            match tokio::time::timeout(self.shared.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    debug!("connection task ended with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection task did not close within timeout; aborting");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection task aborted: {join_err}");
                    }
                }
            }
        }
    }

    /// Queue a text frame for the server.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] unless the state is
    /// [`ConnectionState::Connected`]. The frame is dropped in that case.
    pub fn send(&self, message: String) -> Result<()> {
        let inner = lock(&self.shared.inner);
        let state = self.shared.state.get();
        let outbound = match (&inner.outbound, state) {
            (Some(outbound), ConnectionState::Connected) => outbound,
            _ => {
                warn!(?state, "dropping outbound frame, stream is not connected");
                return Err(SyncError::NotConnected);
            }
        };
        outbound.send(message).map_err(|_| SyncError::NotConnected)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Returns `true` while the stream is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Description of the last transport failure, cleared on a successful
    /// open.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.get()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.get()
    }

    /// The match currently targeted, if any.
    pub fn target(&self) -> Option<MatchId> {
        self.shared.target.get()
    }

    /// Identifier sent in the stream URL.
    pub fn client_id(&self) -> Uuid {
        self.shared.client_id
    }

    /// Abort every background task without a graceful close.
    pub(crate) fn abort(&self) {
        let mut inner = lock(&self.shared.inner);
        inner.intentional = true;
        inner.generation = inner.generation.wrapping_add(1);
        inner.abort_all();
        self.shared.state.set(ConnectionState::Disconnected);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.shared.client_id)
            .field("target", &self.target())
            .field("state", &self.state())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // No executor to drive a graceful close here.
        self.abort();
    }
}

// ── Background tasks ────────────────────────────────────────────────

fn spawn_connection(shared: &Arc<Shared>, inner: &mut Inner, target: MatchId) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    inner.outbound = Some(outbound_tx);
    inner.shutdown = Some(shutdown_tx);
    inner.task = Some(tokio::spawn(connection_loop(
        Arc::clone(shared),
        target,
        inner.generation,
        outbound_rx,
        shutdown_rx,
    )));
}

/// Open the transport, then multiplex send/receive via `tokio::select!`.
///
/// Exits when:
/// - the shutdown signal fires (intentional disconnect)
/// - the transport returns `None` or an error
/// - a send fails
async fn connection_loop(
    shared: Arc<Shared>,
    target: MatchId,
    generation: u64,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let url = shared.config.stream_url(target, &shared.client_id);
    debug!(match_id = target, generation, "opening match stream");

    let mut transport = match shared.connector.connect(&url).await {
        Ok(transport) => transport,
        Err(e) => {
            shared.on_failure(target, generation, format!("connect failed: {e}"));
            return;
        }
    };

    if !shared.on_open(target, generation) {
        let _ = transport.close().await;
        return;
    }

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!(match_id = target, "closing match stream");
                if let Err(e) = transport.close().await {
                    debug!("transport close failed: {e}");
                }
                return;
            }

            outgoing = outbound_rx.recv() => {
                let Some(text) = outgoing else {
                    // The manager dropped the sender: superseded or aborted.
                    let _ = transport.close().await;
                    return;
                };
                if let Err(e) = transport.send(text).await {
                    shared.on_failure(target, generation, format!("transport send error: {e}"));
                    return;
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => shared.forward(target, text),
                    Some(Err(e)) => {
                        shared.on_failure(target, generation, format!("transport receive error: {e}"));
                        return;
                    }
                    None => {
                        shared.on_failure(target, generation, "connection closed by server".into());
                        return;
                    }
                }
            }
        }
    }
}

impl Shared {
    /// Mark generation `generation` as open. Returns `false` if it was
    /// superseded while connecting.
    fn on_open(&self, target: MatchId, generation: u64) -> bool {
        let inner = lock(&self.inner);
        if inner.generation != generation || inner.intentional {
            debug!(match_id = target, "connect finished for a superseded attempt");
            return false;
        }
        self.retry_count.set(0);
        self.last_error.set(None);
        self.state.set(ConnectionState::Connected);
        info!(match_id = target, "match stream connected");
        true
    }

    /// Hand one frame to the consumer. Drops it if the channel is full.
    fn forward(&self, match_id: MatchId, text: String) {
        match self.frame_tx.try_send(InboundText { match_id, text }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(match_id, "inbound frame channel full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("inbound frame channel closed, receiver dropped");
            }
        }
    }

    /// Record an unintentional drop and schedule the next attempt.
    fn on_failure(self: &Arc<Self>, target: MatchId, generation: u64, reason: String) {
        let mut inner = lock(&self.inner);
        if inner.generation != generation || inner.intentional {
            debug!(match_id = target, "ignoring failure of a superseded connection: {reason}");
            return;
        }
        inner.outbound = None;
        inner.shutdown = None;
        // This runs on the connection task itself; dropping the handle detaches it.
        inner.task = None;

        warn!(match_id = target, "match stream failed: {reason}");
        self.last_error.set(Some(reason));
        self.state.set(ConnectionState::Error);

        let attempt = self.retry_count.get().saturating_add(1);
        if !self.config.reconnect.allows(attempt) {
            warn!(
                match_id = target,
                max_retries = self.config.reconnect.max_retries,
                "reconnect budget exhausted, giving up"
            );
            self.state.set(ConnectionState::Disconnected);
            return;
        }
        self.retry_count.set(attempt);

        let delay = self.config.reconnect.delay_for(attempt);
        info!(
            match_id = target,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        let shared = Arc::clone(self);
        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire_reconnect(target, generation);
        }));
    }

    /// Reconnect timer body. A no-op when the timer went stale.
    fn fire_reconnect(self: &Arc<Self>, target: MatchId, generation: u64) {
        let mut inner = lock(&self.inner);
        if inner.generation != generation
            || inner.intentional
            || self.target.get() != Some(target)
            || self.state.get() == ConnectionState::Connected
        {
            debug!(match_id = target, "stale reconnect timer, ignoring");
            return;
        }
        // Dropping our own handle detaches this task, which is about to end.
        inner.reconnect_timer = None;
        inner.generation = inner.generation.wrapping_add(1);
        self.state.set(ConnectionState::Connecting);
        debug!(match_id = target, attempt = self.retry_count.get(), "reconnecting");
        spawn_connection(self, &mut inner, target);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    // ── Mock transport ──────────────────────────────────────────────

    /// Yields whatever the test pushes into `incoming`; dropping the test's
    /// sender looks like a server close.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<std::result::Result<String, SyncError>>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), SyncError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SyncError>> {
            self.incoming.recv().await
        }

        async fn close(&mut self) -> std::result::Result<(), SyncError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Remote {
        tx: mpsc::UnboundedSender<std::result::Result<String, SyncError>>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    fn mock_pair() -> (MockTransport, Remote) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        (
            MockTransport {
                incoming,
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            },
            Remote { tx, sent, closed },
        )
    }

    /// Hands out scripted transports, then refuses.
    #[derive(Default)]
    struct MockConnector {
        scripted: Mutex<VecDeque<MockTransport>>,
        attempts: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl MockConnector {
        fn with(transports: Vec<MockTransport>) -> Arc<Self> {
            Arc::new(Self {
                scripted: Mutex::new(transports.into()),
                ..Self::default()
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, url: &str) -> std::result::Result<Box<dyn Transport>, SyncError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_owned());
            match self.scripted.lock().unwrap().pop_front() {
                Some(transport) => Ok(Box::new(transport)),
                None => Err(SyncError::Connect("connection refused".into())),
            }
        }
    }

    fn config(max_retries: u32) -> SyncConfig {
        SyncConfig::new("ws://test").with_reconnect_policy(ReconnectPolicy {
            max_retries,
            ..ReconnectPolicy::default()
        })
    }

    async fn wait_for(manager: &ConnectionManager, expected: ConnectionState) {
        let mut rx = manager.subscribe_state();
        tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == expected))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_opens_match_url_and_forwards_frames() {
        let (transport, remote) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let (manager, mut frames) = ConnectionManager::new(config(3), connector.clone());

        manager.connect(7);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        wait_for(&manager, ConnectionState::Connected).await;

        let url = connector.urls.lock().unwrap()[0].clone();
        assert_eq!(url, format!("ws://test/ws/matches/7/{}", manager.client_id()));

        remote.tx.send(Ok(r#"{"type":"ping"}"#.into())).unwrap();
        remote.tx.send(Ok(r#"{"type":"event-update"}"#.into())).unwrap();
        let first = frames.recv().await.unwrap();
        let second = frames.recv().await.unwrap();
        assert_eq!(first.match_id, 7);
        assert_eq!(first.text, r#"{"type":"ping"}"#);
        assert_eq!(second.text, r#"{"type":"event-update"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_twice_to_same_target_is_noop() {
        let (transport, _remote) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let (manager, _frames) = ConnectionManager::new(config(3), connector.clone());

        manager.connect(7);
        manager.connect(7);
        wait_for(&manager, ConnectionState::Connected).await;
        manager.connect(7);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_connection() {
        let (transport, remote) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let (manager, _frames) = ConnectionManager::new(config(3), connector);

        assert!(matches!(
            manager.send("early".into()),
            Err(SyncError::NotConnected)
        ));

        manager.connect(1);
        wait_for(&manager, ConnectionState::Connected).await;
        manager.send(r#"{"type":"pong"}"#.into()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*remote.sent.lock().unwrap(), vec![r#"{"type":"pong"}"#.to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_reconnects_and_resets_retry_count() {
        let (first, first_remote) = mock_pair();
        let (second, _second_remote) = mock_pair();
        let connector = MockConnector::with(vec![first, second]);
        let (manager, _frames) = ConnectionManager::new(config(3), connector.clone());

        manager.connect(3);
        wait_for(&manager, ConnectionState::Connected).await;
        drop(first_remote);
        wait_for(&manager, ConnectionState::Error).await;
        assert_eq!(manager.retry_count(), 1);
        assert_eq!(manager.last_error().as_deref(), Some("connection closed by server"));

        wait_for(&manager, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(manager.retry_count(), 0);
        assert_eq!(manager.last_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_settles_disconnected() {
        let connector = MockConnector::with(vec![]);
        let (manager, _frames) = ConnectionManager::new(config(2), connector.clone());

        manager.connect(9);
        wait_for(&manager, ConnectionState::Disconnected).await;
        // One initial attempt plus two retries.
        assert_eq!(connector.attempts(), 3);
        assert_eq!(manager.retry_count(), 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 3);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let connector = MockConnector::with(vec![]);
        let (manager, _frames) = ConnectionManager::new(config(10), connector.clone());

        manager.connect(4);
        wait_for(&manager, ConnectionState::Error).await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_transport_gracefully() {
        let (transport, remote) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let (manager, _frames) = ConnectionManager::new(config(3), connector.clone());

        manager.connect(2);
        wait_for(&manager, ConnectionState::Connected).await;
        manager.disconnect().await;
        assert!(remote.closed.load(Ordering::SeqCst));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // Intentional teardown never reconnects.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 1);
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_is_a_noop_after_target_change() {
        let (transport, _remote) = mock_pair();
        let connector = MockConnector::with(vec![]);
        let (manager, _frames) = ConnectionManager::new(config(10), connector.clone());

        manager.connect(1);
        wait_for(&manager, ConnectionState::Error).await;
        let stale_generation = lock(&manager.shared.inner).generation;

        connector.scripted.lock().unwrap().push_back(transport);
        manager.connect(2);
        wait_for(&manager, ConnectionState::Connected).await;
        let attempts = connector.attempts();

        manager.shared.fire_reconnect(1, stale_generation);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts(), attempts);
        assert_eq!(manager.target(), Some(2));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn full_frame_channel_drops_without_blocking() {
        let (transport, remote) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let (manager, mut frames) =
            ConnectionManager::new(config(3).with_frame_channel_capacity(1), connector);

        manager.connect(5);
        wait_for(&manager, ConnectionState::Connected).await;
        for i in 0..5 {
            remote.tx.send(Ok(format!("{{\"n\":{i}}}"))).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(frames.recv().await.unwrap().text, "{\"n\":0}");
        // The loop kept running: sends still go through.
        manager.send("after".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(remote.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn quality_classification() {
        use ConnectionQuality as Q;
        use ConnectionState as S;
        let now = 1_000_000;
        assert_eq!(Q::classify(S::Connecting, Some(10), Some(now), now), Q::Disconnected);
        assert_eq!(Q::classify(S::Connected, None, None, now), Q::Good);
        assert_eq!(Q::classify(S::Connected, Some(199), Some(now), now), Q::Good);
        assert_eq!(Q::classify(S::Connected, Some(200), Some(now), now), Q::Fair);
        assert_eq!(Q::classify(S::Connected, Some(500), Some(now), now), Q::Poor);
        assert_eq!(
            Q::classify(S::Connected, Some(20), Some(now - HEARTBEAT_STALE_MS - 1), now),
            Q::Poor
        );
    }
}
