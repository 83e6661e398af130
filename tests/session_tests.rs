#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! End-to-end session tests.
//!
//! Each test drives a [`MatchSession`] through the shared `MockConnector` /
//! `MockTransport` pair on a paused tokio clock, plays the server side by
//! pushing JSON frames, and inspects the resulting store state, the frames
//! sent back and the recorded API calls.

mod common;

use std::sync::Arc;
use std::time::Duration;

use matchday_sync::action_lock::LockTarget;
use matchday_sync::config::ReconnectPolicy;
use matchday_sync::protocol::{ClockCommand, ClockDirection, ClockKind, ClockStatus};
use matchday_sync::{ConnectionQuality, ConnectionState, MatchSession, SyncConfig, SyncError};
use serde_json::{json, Value};

use common::{
    clock_update_json, eventually, init_tracing, initial_load_json, match_data_update_json,
    object, ping_json, running_clock_json, settle, ApiCall, MockApi, MockConnector,
    MockTransport, ServerHandle, TokioTimeSource, T0,
};

const MATCH: i64 = 7;
const WAIT: Duration = Duration::from_secs(5);

fn config() -> SyncConfig {
    SyncConfig::new("ws://scores.test")
}

/// Connect a session to `MATCH` and wait until the stream is open.
async fn connected_session(api: Arc<MockApi>) -> (MatchSession, ServerHandle, Arc<MockConnector>) {
    init_tracing();
    let (connector, server) = MockConnector::single();
    let session = MatchSession::with_time_source(config(), connector.clone(), api, TokioTimeSource::new());
    session.connect(MATCH);
    eventually(WAIT, || session.connection_state() == ConnectionState::Connected).await;
    (session, server, connector)
}

async fn loaded_session(api: Arc<MockApi>) -> (MatchSession, ServerHandle) {
    let (session, server, _) = connected_session(api).await;
    server.push(initial_load_json(MATCH));
    eventually(WAIT, || session.store().initialized.get()).await;
    (session, server)
}

/// Send a heartbeat stamped `T0 + skew_ms` and return the server clock
/// offset the session measured from it.
async fn heartbeat(session: &MatchSession, server: &ServerHandle, skew_ms: i64) -> i64 {
    let before = session.store().last_ping_at_ms.get();
    server.push(ping_json(T0 + skew_ms));
    eventually(WAIT, || session.store().last_ping_at_ms.get() != before).await;
    session.store().server_offset_ms.get().unwrap()
}

fn sent_json(server: &ServerHandle) -> Vec<Value> {
    server
        .sent()
        .iter()
        .map(|text| serde_json::from_str(text).unwrap())
        .collect()
}

// ════════════════════════════════════════════════════════════════════
// Connection and heartbeat
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn connects_to_match_scoped_stream() {
    let (session, _server, connector) = connected_session(MockApi::new()).await;
    let urls = connector.urls.lock().unwrap().clone();
    assert_eq!(
        urls,
        vec![format!("ws://scores.test/ws/matches/7/{}", session.client_id())]
    );
    assert_eq!(session.match_id(), Some(MATCH));
}

#[tokio::test(start_paused = true)]
async fn ping_is_answered_with_pong_echo() {
    let (session, server, _) = connected_session(MockApi::new()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.push(ping_json(T0 + 40));
    eventually(WAIT, || !server.sent().is_empty()).await;

    assert_eq!(sent_json(&server), vec![json!({"type": "pong", "timestamp": T0 + 40})]);
    let rtt = session.store().round_trip_ms.get().unwrap();
    assert!((60..=70).contains(&rtt), "unexpected round trip {rtt}");
    assert!(session.store().last_ping_at_ms.get().is_some());
    assert_eq!(session.quality(), ConnectionQuality::Good);
}

#[tokio::test(start_paused = true)]
async fn stale_heartbeat_degrades_quality() {
    let (session, server, _) = connected_session(MockApi::new()).await;
    server.push(ping_json(T0));
    eventually(WAIT, || session.store().last_ping_at_ms.get().is_some()).await;
    assert_eq!(session.quality(), ConnectionQuality::Good);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(session.quality(), ConnectionQuality::Poor);

    session.disconnect().await;
    assert_eq!(session.quality(), ConnectionQuality::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_server_close_and_resumes_routing() {
    init_tracing();
    let (first, first_server) = MockTransport::new();
    let (second, second_server) = MockTransport::new();
    let connector = MockConnector::new(vec![first, second]);
    let session = MatchSession::with_time_source(
        config(),
        connector.clone(),
        MockApi::new(),
        TokioTimeSource::new(),
    );
    session.connect(MATCH);
    eventually(WAIT, || session.connection_state() == ConnectionState::Connected).await;

    drop(first_server);
    eventually(WAIT, || session.connection_state() == ConnectionState::Error).await;
    assert!(session.connection().last_error().is_some());

    // First retry waits at most base delay plus jitter.
    eventually(WAIT, || session.connection_state() == ConnectionState::Connected).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(session.connection().retry_count(), 0);
    assert_eq!(session.connection().last_error(), None);

    second_server.push(initial_load_json(MATCH));
    eventually(WAIT, || session.store().initialized.get()).await;
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_retry_budget() {
    let connector = MockConnector::new(vec![]);
    let session = MatchSession::with_time_source(
        config().with_reconnect_policy(ReconnectPolicy {
            max_retries: 3,
            ..ReconnectPolicy::default()
        }),
        connector.clone(),
        MockApi::new(),
        TokioTimeSource::new(),
    );
    session.connect(MATCH);
    eventually(Duration::from_secs(120), || {
        session.connection_state() == ConnectionState::Disconnected
    })
    .await;
    assert_eq!(connector.attempts(), 4);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn send_when_disconnected_is_rejected() {
    let session = MatchSession::with_time_source(
        config(),
        MockConnector::new(vec![]),
        MockApi::new(),
        TokioTimeSource::new(),
    );
    let pong = matchday_sync::OutboundMessage::Pong { timestamp: None };
    let err = tokio_test::assert_err!(session.send(&pong));
    assert!(matches!(err, SyncError::NotConnected));
}

// ════════════════════════════════════════════════════════════════════
// Routing into the store
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn initial_load_populates_every_slice() {
    let (session, _server) = loaded_session(MockApi::new()).await;
    let store = session.store();

    assert_eq!(store.match_info.get().unwrap().title.as_deref(), Some("City Derby"));
    assert_eq!(store.match_data.get().unwrap().period.as_deref(), Some("1st"));
    assert_eq!(store.teams.get().unwrap().team_b.unwrap().title, "Bears");
    assert_eq!(store.players.get().len(), 2);
    assert!(store.scoreboard.get().unwrap().is_qtr.unwrap());
    assert_eq!(store.gameclock.get().unwrap().value, 720);
    assert_eq!(store.playclock.get().unwrap().max, Some(40));
    // Stopped clocks are shown as-is.
    eventually(WAIT, || store.gameclock_display.get() == Some(720)).await;
    eventually(WAIT, || store.playclock_display.get() == Some(40)).await;
}

#[tokio::test(start_paused = true)]
async fn match_update_merges_fields_and_is_idempotent() {
    let (session, server) = loaded_session(MockApi::new()).await;
    let store = session.store();

    let update = match_data_update_json(json!({"score_team_a": 7, "down": "2nd"}));
    server.push(update.clone());
    eventually(WAIT, || store.match_data.get().unwrap().score_team_a == Some(7)).await;
    let once = store.match_data.get();

    server.push(update);
    settle().await;
    assert_eq!(store.match_data.get(), once);

    let data = once.unwrap();
    assert_eq!(data.down.as_deref(), Some("2nd"));
    assert_eq!(data.distance.as_deref(), Some("10"));
    assert_eq!(data.score_team_b, Some(0));
}

#[tokio::test(start_paused = true)]
async fn undecodable_frames_are_skipped() {
    let (session, server) = loaded_session(MockApi::new()).await;

    server.push_text("{not json");
    server.push(json!({"type": "players-update", "data": {"players": "nope"}}));
    server.push(json!({"type": "event-update", "data": {"events": [{"id": 5, "event_type": "touchdown"}]}}));

    eventually(WAIT, || session.store().events.get().len() == 1).await;
    assert_eq!(session.store().players.get().len(), 2);
    assert_eq!(session.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn null_clock_clears_clock_and_display() {
    let (session, server) = loaded_session(MockApi::new()).await;
    eventually(WAIT, || session.store().playclock_display.get().is_some()).await;

    server.push(clock_update_json(ClockKind::Play, Value::Null, None));
    eventually(WAIT, || session.store().playclock.get().is_none()).await;
    eventually(WAIT, || session.store().playclock_display.get().is_none()).await;
}

// ════════════════════════════════════════════════════════════════════
// Clock prediction
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn running_clock_is_predicted_between_samples() {
    let (session, server) = loaded_session(MockApi::new()).await;
    let started = T0 + 100;
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.push(clock_update_json(
        ClockKind::Game,
        running_clock_json(ClockKind::Game, 600, started),
        None,
    ));
    eventually(WAIT, || session.store().gameclock.get().unwrap().is_running()).await;

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(session.store().gameclock_display.get(), Some(598));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(session.store().gameclock_display.get(), Some(597));
}

#[tokio::test(start_paused = true)]
async fn down_clock_stops_at_zero() {
    let (session, server) = loaded_session(MockApi::new()).await;
    server.push(clock_update_json(
        ClockKind::Play,
        running_clock_json(ClockKind::Play, 2, T0),
        None,
    ));
    eventually(Duration::from_secs(10), || {
        session.store().playclock_display.get() == Some(0)
    })
    .await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.store().playclock_display.get(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn up_clock_stop_at_zero_is_held_at_max() {
    let (session, server) = loaded_session(MockApi::new()).await;
    server.push(clock_update_json(
        ClockKind::Game,
        json!({"gameclock": 58, "gameclock_max": 60, "direction": "up", "status": "running", "started_at_ms": T0}),
        None,
    ));
    eventually(WAIT, || session.store().gameclock.get().unwrap().is_running()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    server.push(clock_update_json(
        ClockKind::Game,
        json!({"gameclock": 0, "gameclock_max": 60, "direction": "up", "status": "stopped"}),
        None,
    ));
    eventually(WAIT, || !session.store().gameclock.get().unwrap().is_running()).await;
    let clock = session.store().gameclock.get().unwrap();
    assert_eq!(clock.value, 60);
    assert_eq!(clock.direction, ClockDirection::Up);
    eventually(WAIT, || session.store().gameclock_display.get() == Some(60)).await;
}

// ════════════════════════════════════════════════════════════════════
// Optimistic edits and the action lock
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn local_start_survives_stale_echo() {
    let api = MockApi::new();
    let (session, server) = loaded_session(api.clone()).await;
    // The backend's clock runs 300ms ahead of ours.
    let offset = heartbeat(&session, &server, 300).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = session.start_clock(ClockKind::Game).unwrap();
    assert_eq!(started.status, ClockStatus::Running);
    assert!(session.action_lock().is_armed(LockTarget::GameClock, T0 + 200));
    let command_at = session
        .action_lock()
        .fence(LockTarget::GameClock)
        .unwrap()
        .last_local_command_at_ms;
    eventually(WAIT, || !api.calls().is_empty()).await;
    assert_eq!(
        api.calls(),
        vec![ApiCall::Clock(MATCH, ClockKind::Game, ClockCommand::Start)]
    );

    // Broadcast of the state 40ms before the command, delivered late. Its
    // server stamp is later than the command on our clock.
    let stale_stamp = command_at - 40 + offset;
    assert!(stale_stamp > command_at);
    let stale = clock_update_json(
        ClockKind::Game,
        json!({"gameclock": 720, "gameclock_max": 720, "status": "stopped"}),
        Some(stale_stamp),
    );
    server.push(stale.clone());
    settle().await;
    assert!(session.store().gameclock.get().unwrap().is_running());

    // Once the window is over the server wins again.
    tokio::time::sleep(Duration::from_millis(600)).await;
    server.push(stale);
    eventually(WAIT, || !session.store().gameclock.get().unwrap().is_running()).await;
}

#[tokio::test(start_paused = true)]
async fn broadcast_of_the_command_itself_is_accepted() {
    let (session, server) = loaded_session(MockApi::new()).await;
    let offset = heartbeat(&session, &server, 0).await;
    session.start_clock(ClockKind::Play).unwrap();
    let fence = session.action_lock().fence(LockTarget::PlayClock).unwrap();
    let now = fence.last_local_command_at_ms + 10 + offset;
    tokio::time::sleep(Duration::from_millis(10)).await;

    server.push(clock_update_json(
        ClockKind::Play,
        json!({"playclock": 39, "playclock_max": 40, "status": "running", "started_at_ms": now, "server_time_ms": now}),
        None,
    ));
    eventually(WAIT, || session.store().playclock.get().unwrap().value == 39).await;
}

#[tokio::test(start_paused = true)]
async fn failed_command_keeps_optimistic_state() {
    let api = MockApi::rejecting();
    let (session, _server) = loaded_session(api.clone()).await;

    session
        .update_clock(ClockKind::Game, Some(300), None, None)
        .unwrap();
    eventually(WAIT, || api.calls().len() == 1).await;
    settle().await;
    assert_eq!(session.store().gameclock.get().unwrap().value, 300);
    eventually(WAIT, || session.store().gameclock_display.get() == Some(300)).await;
}

#[tokio::test(start_paused = true)]
async fn reset_returns_game_clock_to_initial_time() {
    let (session, server) = loaded_session(MockApi::new()).await;
    server.push(json!({"type": "match-update", "data": {
        "scoreboard_data": {"initial_time_mode": "zero"}
    }}));
    eventually(WAIT, || {
        session
            .store()
            .scoreboard
            .get()
            .and_then(|s| s.initial_time_mode)
            .is_some()
    })
    .await;

    session.start_clock(ClockKind::Game).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let reset = session.reset_clock(ClockKind::Game).unwrap();
    assert_eq!(reset.value, 0);
    assert_eq!(reset.status, ClockStatus::Stopped);

    let play = session.reset_clock(ClockKind::Play).unwrap();
    assert_eq!(play.value, 40);
}

#[tokio::test(start_paused = true)]
async fn match_data_edit_is_optimistic_and_fenced() {
    let api = MockApi::new();
    let (session, server) = loaded_session(api.clone()).await;

    let patch = object(json!({"score_team_b": 3}));
    let merged = session.edit_match_data(patch.clone()).unwrap();
    assert_eq!(merged.score_team_b, Some(3));
    assert_eq!(merged.period.as_deref(), Some("1st"));
    eventually(WAIT, || !api.calls().is_empty()).await;
    assert_eq!(api.calls(), vec![ApiCall::MatchData(MATCH, patch)]);

    // An unstamped echo of the old score inside the window is dropped.
    server.push(match_data_update_json(json!({"score_team_b": 0})));
    settle().await;
    assert_eq!(session.store().match_data.get().unwrap().score_team_b, Some(3));
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_idempotent_and_stops_prediction() {
    let (session, server) = loaded_session(MockApi::new()).await;
    server.push(clock_update_json(
        ClockKind::Game,
        running_clock_json(ClockKind::Game, 600, T0),
        None,
    ));
    eventually(WAIT, || session.store().gameclock.get().unwrap().is_running()).await;

    session.shutdown().await;
    assert!(server.closed.load(std::sync::atomic::Ordering::Relaxed));
    let frozen = session.store().gameclock_display.get();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.store().gameclock_display.get(), frozen);
    session.shutdown().await;
}
