//! Per-view composition of the synchronization core.
//!
//! A [`MatchSession`] wires one [`ConnectionManager`], one [`MatchStore`],
//! one [`ActionLock`] and two [`ClockPredictor`]s together:
//!
//! ```text
//! transport ──frames──▶ dispatch task ──decode──▶ MessageRouter ──▶ MatchStore
//!                           │                          │               │
//!                           └──── pong ◀── Reply ──────┘        clock watchers
//!                                                                      │
//!                                                  ClockPredictor ──▶ *_display
//! ```
//!
//! Local edits go the other way: they are applied to the store at once,
//! fence the action lock, and are then sent to the backend through the
//! [`MatchApi`] without waiting for an answer.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::action_lock::{ActionLock, LockTarget};
use crate::api::MatchApi;
use crate::clock::{apply_command, initial_seconds, ClockPredictor};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionQuality, ConnectionState, InboundText};
use crate::error::{Result, SyncError};
use crate::lock;
use crate::protocol::{
    ClockCommand, ClockDirection, ClockKind, ClockSnapshot, InboundFrame, JsonObject, MatchData,
    MatchId, OutboundMessage,
};
use crate::router::{MessageRouter, RouteOutcome};
use crate::store::{merge_fields, MatchStore};
use crate::time::{SharedTimeSource, SystemTimeSource};
use crate::transport::Connector;

/// Live mirror of one match for one consumer view.
///
/// Created via [`MatchSession::new`], which spawns the background tasks and
/// therefore must be called from within a tokio runtime. Sessions share
/// nothing with each other.
pub struct MatchSession {
    config: SyncConfig,
    connection: Arc<ConnectionManager>,
    store: Arc<MatchStore>,
    action_lock: Arc<ActionLock>,
    api: Arc<dyn MatchApi>,
    time: SharedTimeSource,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MatchSession {
    /// Create an idle session reading wall time from the system clock.
    pub fn new(config: SyncConfig, connector: Arc<dyn Connector>, api: Arc<dyn MatchApi>) -> Self {
        Self::with_time_source(config, connector, api, Arc::new(SystemTimeSource))
    }

    /// Create an idle session with an explicit time source.
    pub fn with_time_source(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        api: Arc<dyn MatchApi>,
        time: SharedTimeSource,
    ) -> Self {
        let (connection, frames) = ConnectionManager::new(config.clone(), connector);
        let connection = Arc::new(connection);
        let store = Arc::new(MatchStore::new());
        let action_lock = Arc::new(ActionLock::new(config.action_lock_window));
        let router = MessageRouter::new(
            Arc::clone(&store),
            Arc::clone(&action_lock),
            config.default_round_trip_ms,
        );

        let mut tasks = Vec::with_capacity(1 + ClockKind::ALL.len());
        tasks.push(tokio::spawn(dispatch_loop(
            frames,
            router,
            Arc::clone(&connection),
            Arc::clone(&time),
        )));
        for kind in ClockKind::ALL {
            let display = Arc::clone(&store);
            let predictor = ClockPredictor::new(Arc::clone(&time), config.frame_interval, move |value| {
                display.clock_display(kind).set(Some(value));
            });
            tasks.push(tokio::spawn(clock_watch(
                kind,
                store.clock(kind).subscribe(),
                predictor,
                Arc::clone(&store),
            )));
        }

        Self {
            config,
            connection,
            store,
            action_lock,
            api,
            time,
            tasks: Mutex::new(tasks),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Attach to `match_id`. Switching to another match clears the store
    /// first so no slice of the previous match leaks into the new one.
    pub fn connect(&self, match_id: MatchId) {
        if let Some(previous) = self.connection.target() {
            if previous != match_id {
                debug!(previous, match_id, "switching match, clearing view");
                self.store.clear();
            }
        }
        self.connection.connect(match_id);
    }

    /// Close the stream on purpose. The store keeps its last state.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Disconnect and stop every background task. Idempotent.
    pub async fn shutdown(&self) {
        debug!("MatchSession: shutdown requested");
        self.connection.disconnect().await;
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            task.abort();
            if let Err(join_err) = task.await {
                if !join_err.is_cancelled() {
                    warn!("session task terminated with join error: {join_err}");
                }
            }
        }
    }

    /// Send a frame over the stream.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] when the stream is not open, or
    /// [`SyncError::Serialization`] if the message cannot be encoded.
    pub fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.connection.send(serde_json::to_string(message)?)
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// The reactive read model.
    pub fn store(&self) -> &Arc<MatchStore> {
        &self.store
    }

    /// The underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The echo-suppression fences of this view.
    pub fn action_lock(&self) -> &ActionLock {
        &self.action_lock
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn match_id(&self) -> Option<MatchId> {
        self.connection.target()
    }

    pub fn client_id(&self) -> Uuid {
        self.connection.client_id()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch connection state changes.
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Current connection quality from state, round trip and heartbeat age.
    pub fn quality(&self) -> ConnectionQuality {
        ConnectionQuality::classify(
            self.connection.state(),
            self.store.round_trip_ms.get(),
            self.store.last_ping_at_ms.get(),
            self.time.now_ms(),
        )
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Apply `command` to the `kind` clock locally, fence the lock and send
    /// the command to the backend.
    ///
    /// Returns the snapshot written to the store. A backend failure is only
    /// logged; the optimistic state stays until the server says otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoTarget`] if no match was ever targeted.
    pub fn apply_local_clock_edit(&self, kind: ClockKind, command: ClockCommand) -> Result<ClockSnapshot> {
        let match_id = self.connection.target().ok_or(SyncError::NoTarget)?;
        let slot = self.store.clock(kind);
        let next = {
            let mut fences = self.action_lock.enter();
            let now = self.time.now_ms();
            let current = slot.get().unwrap_or_default();
            let next = apply_command(&current, &command, now);
            fences.arm(LockTarget::from(kind), now);
            slot.set(Some(next.clone()));
            next
        };
        debug!(match_id, %kind, ?command, value = next.value, "applied local clock edit");

        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Err(e) = api.send_clock_command(match_id, kind, &command).await {
                warn!(match_id, %kind, "clock command failed: {e}");
            }
        });
        Ok(next)
    }

    /// Start the `kind` clock.
    ///
    /// # Errors
    ///
    /// See [`apply_local_clock_edit`](Self::apply_local_clock_edit).
    pub fn start_clock(&self, kind: ClockKind) -> Result<ClockSnapshot> {
        self.apply_local_clock_edit(kind, ClockCommand::Start)
    }

    /// Pause the `kind` clock.
    ///
    /// # Errors
    ///
    /// See [`apply_local_clock_edit`](Self::apply_local_clock_edit).
    pub fn pause_clock(&self, kind: ClockKind) -> Result<ClockSnapshot> {
        self.apply_local_clock_edit(kind, ClockCommand::Pause)
    }

    /// Stop the `kind` clock and return it to its starting value.
    ///
    /// A down-counting game clock with a known maximum starts from the
    /// value chosen by the scoreboard's initial-time mode.
    ///
    /// # Errors
    ///
    /// See [`apply_local_clock_edit`](Self::apply_local_clock_edit).
    pub fn reset_clock(&self, kind: ClockKind) -> Result<ClockSnapshot> {
        let value = match kind {
            ClockKind::Game => self.reset_value_for_game_clock(),
            ClockKind::Play => None,
        };
        self.apply_local_clock_edit(kind, ClockCommand::Reset { value })
    }

    /// Set any of value, maximum and direction on the `kind` clock.
    ///
    /// # Errors
    ///
    /// See [`apply_local_clock_edit`](Self::apply_local_clock_edit).
    pub fn update_clock(
        &self,
        kind: ClockKind,
        value: Option<u32>,
        max: Option<u32>,
        direction: Option<ClockDirection>,
    ) -> Result<ClockSnapshot> {
        self.apply_local_clock_edit(
            kind,
            ClockCommand::Update {
                value,
                max,
                direction,
            },
        )
    }

    /// Merge `patch` into `match_data` locally, fence the lock and send the
    /// patch to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoTarget`] if no match was ever targeted, or
    /// [`SyncError::Serialization`] if a patched field has the wrong type
    /// (nothing is applied or sent in that case).
    pub fn edit_match_data(&self, patch: JsonObject) -> Result<MatchData> {
        let match_id = self.connection.target().ok_or(SyncError::NoTarget)?;
        let merged = {
            let mut fences = self.action_lock.enter();
            let current = self.store.match_data.get().unwrap_or_default();
            let merged: MatchData = merge_fields(&current, &patch)?;
            fences.arm(LockTarget::MatchData, self.time.now_ms());
            self.store.match_data.set(Some(merged.clone()));
            merged
        };
        debug!(match_id, fields = patch.len(), "applied local match data edit");

        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Err(e) = api.update_match_data(match_id, &patch).await {
                warn!(match_id, "match data update failed: {e}");
            }
        });
        Ok(merged)
    }

    fn reset_value_for_game_clock(&self) -> Option<u32> {
        let clock = self.store.gameclock.get()?;
        if clock.direction != ClockDirection::Down {
            return None;
        }
        let max = clock.max?;
        let settings = self.store.scoreboard.get().unwrap_or_default();
        Some(initial_seconds(
            max,
            settings.initial_time_mode.unwrap_or_default(),
            settings.initial_time_min_seconds,
        ))
    }
}

impl std::fmt::Debug for MatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSession")
            .field("connection", &self.connection)
            .field("tasks", &lock(&self.tasks).len())
            .finish()
    }
}

impl Drop for MatchSession {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.connection.abort();
    }
}

// ── Background tasks ────────────────────────────────────────────────

/// Decode and route inbound frames one at a time, in arrival order.
async fn dispatch_loop(
    mut frames: mpsc::Receiver<InboundText>,
    router: MessageRouter,
    connection: Arc<ConnectionManager>,
    time: SharedTimeSource,
) {
    debug!("dispatch loop started");
    while let Some(InboundText { match_id, text }) = frames.recv().await {
        if connection.target() != Some(match_id) {
            debug!(match_id, "dropping frame of a previous match");
            continue;
        }
        let frame = match InboundFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(match_id, "failed to decode inbound frame: {e}");
                continue;
            }
        };
        match router.route(frame, time.now_ms()) {
            RouteOutcome::Reply(reply) => match serde_json::to_string(&reply) {
                Ok(json) => {
                    if let Err(e) = connection.send(json) {
                        debug!("reply not sent: {e}");
                    }
                }
                Err(e) => warn!("failed to encode reply: {e}"),
            },
            RouteOutcome::Suppressed(target) => {
                debug!(match_id, ?target, "inbound sample suppressed");
            }
            RouteOutcome::Applied | RouteOutcome::Ignored => {}
        }
    }
    debug!("dispatch loop exited");
}

/// Feed every accepted snapshot of one clock into its predictor.
async fn clock_watch(
    kind: ClockKind,
    mut snapshots: watch::Receiver<Option<ClockSnapshot>>,
    predictor: ClockPredictor,
    store: Arc<MatchStore>,
) {
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        match snapshot {
            Some(snapshot) => predictor.sync(snapshot),
            None => {
                predictor.destroy();
                store.clock_display(kind).set(None);
            }
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::api::NoopMatchApi;
    use crate::time::ManualTimeSource;
    use async_trait::async_trait;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(
            &self,
            _url: &str,
        ) -> std::result::Result<Box<dyn crate::transport::Transport>, SyncError> {
            Err(SyncError::Connect("offline".into()))
        }
    }

    fn session(time: ManualTimeSource) -> MatchSession {
        MatchSession::with_time_source(
            SyncConfig::new("ws://test").with_max_retries(0),
            Arc::new(RefusingConnector),
            Arc::new(NoopMatchApi),
            Arc::new(time),
        )
    }

    #[tokio::test]
    async fn commands_need_a_target() {
        let session = session(ManualTimeSource::new(0));
        assert!(matches!(
            session.start_clock(ClockKind::Game),
            Err(SyncError::NoTarget)
        ));
        assert!(matches!(
            session.edit_match_data(JsonObject::new()),
            Err(SyncError::NoTarget)
        ));
    }

    #[tokio::test]
    async fn game_clock_reset_uses_initial_time_mode() {
        let session = session(ManualTimeSource::new(1_000));
        session.connect(1);
        session.store().gameclock.set(Some(ClockSnapshot {
            value: 300,
            max: Some(720),
            ..ClockSnapshot::default()
        }));
        session.store().scoreboard.set(Some(crate::protocol::ScoreboardSettings {
            initial_time_mode: Some(crate::protocol::InitialTimeMode::Min),
            initial_time_min_seconds: Some(600),
            ..Default::default()
        }));

        let reset = session.reset_clock(ClockKind::Game).unwrap();
        assert_eq!(reset.value, 600);
        assert!(session.action_lock().is_armed(LockTarget::GameClock, 1_000));

        session.store().scoreboard.set(None);
        assert_eq!(session.reset_clock(ClockKind::Game).unwrap().value, 720);
    }

    #[tokio::test]
    async fn malformed_match_data_edit_changes_nothing() {
        let session = session(ManualTimeSource::new(5));
        session.connect(1);
        let mut patch = JsonObject::new();
        patch.insert("score_team_a".into(), serde_json::json!("seven"));
        assert!(session.edit_match_data(patch).is_err());
        assert_eq!(session.store().match_data.get(), None);
        assert!(!session.action_lock().is_armed(LockTarget::MatchData, 5));
    }

    #[tokio::test]
    async fn switching_match_clears_view() {
        let session = session(ManualTimeSource::new(0));
        session.connect(1);
        session.store().initialized.set(true);
        session.connect(1);
        assert!(session.store().initialized.get());
        session.connect(2);
        assert!(!session.store().initialized.get());
        assert_eq!(session.match_id(), Some(2));
        session.shutdown().await;
        session.shutdown().await;
    }
}
