//! Inbound message routing.
//!
//! [`MessageRouter::route`] takes one decoded [`InboundFrame`] and hands it to
//! exactly one handler. Handlers assign whole slices or individual fields in
//! the [`MatchStore`]. Clock samples and `match_data` from any frame type are
//! checked against the [`ActionLock`] first, under the same fence guard as the
//! store write; clocks are then merged onto the current reading and
//! normalized. The router never awaits: one frame is fully applied before the
//! next is looked at.
//!
//! Frame stamps come from the server's clock. They are moved onto the local
//! clock with the offset measured from heartbeats before they are compared
//! with a local edit; until the first heartbeat no stamp can be placed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::action_lock::{ActionLock, LockTarget};
use crate::clock::{merge_sample, normalize_incoming};
use crate::protocol::{
    ClockKind, ClockPatch, InboundFrame, InboundMessage, MatchData, MatchPatch, MatchSnapshot,
    OutboundMessage,
};
use crate::store::MatchStore;

/// What the caller has to do after a frame was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The frame was merged (or was a harmless no-op).
    Applied,
    /// A reply must be sent back over the stream.
    Reply(OutboundMessage),
    /// A clock or match-data sample was dropped by the action lock.
    Suppressed(LockTarget),
    /// The frame carried nothing the router could use.
    Ignored,
}

impl RouteOutcome {
    /// Keep the first suppression seen while routing several samples.
    fn absorb(&mut self, next: Self) {
        if matches!(next, Self::Suppressed(_)) && !matches!(self, Self::Suppressed(_)) {
            *self = next;
        }
    }
}

/// Dispatches decoded frames into a [`MatchStore`].
#[derive(Debug, Clone)]
pub struct MessageRouter {
    store: Arc<MatchStore>,
    action_lock: Arc<ActionLock>,
    default_round_trip_ms: u32,
}

impl MessageRouter {
    /// Create a router writing into `store` and consulting `action_lock`.
    pub fn new(store: Arc<MatchStore>, action_lock: Arc<ActionLock>, default_round_trip_ms: u32) -> Self {
        Self {
            store,
            action_lock,
            default_round_trip_ms,
        }
    }

    /// Apply one frame received at local time `now_ms`.
    pub fn route(&self, frame: InboundFrame, now_ms: i64) -> RouteOutcome {
        let InboundFrame {
            timestamp, message, ..
        } = frame;
        debug!(kind = message.label(), "routing frame");

        match message {
            InboundMessage::Ping { timestamp } => self.on_ping(timestamp, now_ms),
            InboundMessage::ClockUpdate { kind, clock } => {
                self.on_clock(kind, clock, timestamp, now_ms)
            }
            InboundMessage::EventUpdate { events } => {
                self.store.replace_events(events, now_ms);
                RouteOutcome::Applied
            }
            InboundMessage::StatisticsUpdate { statistics } => {
                self.store.replace_statistics(statistics, now_ms);
                RouteOutcome::Applied
            }
            InboundMessage::PlayersUpdate { players } => {
                self.store.replace_players(players, now_ms);
                RouteOutcome::Applied
            }
            InboundMessage::InitialLoad(snapshot) => {
                self.on_initial_load(*snapshot, timestamp, now_ms)
            }
            InboundMessage::MatchUpdate(patch) => self.on_patch(*patch, timestamp, now_ms),
            InboundMessage::Raw(snapshot) => self.on_raw(*snapshot, timestamp, now_ms),
        }
    }

    fn on_ping(&self, timestamp: Option<i64>, now_ms: i64) -> RouteOutcome {
        self.store.last_ping_at_ms.set(Some(now_ms));
        if let Some(sent_at) = timestamp {
            let rtt = u32::try_from(now_ms.saturating_sub(sent_at).max(0)).unwrap_or(u32::MAX);
            self.store.round_trip_ms.set(Some(rtt));
            self.store
                .server_offset_ms
                .set(Some(sent_at.saturating_sub(now_ms)));
        }
        RouteOutcome::Reply(OutboundMessage::Pong { timestamp })
    }

    fn local_stamp(&self, server_ms: Option<i64>) -> Option<i64> {
        server_ms.and_then(|ms| self.store.to_local_ms(ms))
    }

    /// Merge one clock sample. `None` clears the clock.
    fn on_clock(
        &self,
        kind: ClockKind,
        clock: Option<ClockPatch>,
        frame_timestamp: Option<i64>,
        now_ms: i64,
    ) -> RouteOutcome {
        let target = LockTarget::from(kind);
        let stamp = self.local_stamp(
            clock
                .as_ref()
                .and_then(|c| c.server_time_ms)
                .or(frame_timestamp),
        );

        let fences = self.action_lock.enter();
        if fences.should_suppress(target, stamp, now_ms) {
            debug!(%kind, ?stamp, "clock sample suppressed by action lock");
            return RouteOutcome::Suppressed(target);
        }

        let slot = self.store.clock(kind);
        let Some(patch) = clock else {
            slot.set(None);
            return RouteOutcome::Applied;
        };
        let round_trip = self
            .store
            .round_trip_ms
            .get()
            .unwrap_or(self.default_round_trip_ms);
        let next = slot.with(|current| {
            let current = current.as_ref();
            let mut next = normalize_incoming(current, merge_sample(current, &patch, now_ms), now_ms);
            if patch.round_trip_ms.is_none() {
                next.round_trip_ms = Some(round_trip);
            }
            next
        });
        slot.set(Some(next));
        drop(fences);
        RouteOutcome::Applied
    }

    /// Replace `match_data` carried whole by a snapshot frame.
    fn on_match_data(
        &self,
        data: MatchData,
        frame_timestamp: Option<i64>,
        now_ms: i64,
    ) -> RouteOutcome {
        let stamp = self.local_stamp(frame_timestamp);
        let fences = self.action_lock.enter();
        if fences.should_suppress(LockTarget::MatchData, stamp, now_ms) {
            debug!(?stamp, "match_data suppressed by action lock");
            return RouteOutcome::Suppressed(LockTarget::MatchData);
        }
        self.store.match_data.set(Some(data));
        drop(fences);
        RouteOutcome::Applied
    }

    fn on_initial_load(
        &self,
        mut snapshot: MatchSnapshot,
        frame_timestamp: Option<i64>,
        now_ms: i64,
    ) -> RouteOutcome {
        let first = !self.store.initialized.get();
        if !first {
            debug!("repeated initial-load, filling empty slices only");
        }
        let clocks = take_clocks(&mut snapshot);
        self.store.apply_snapshot(snapshot, !first, now_ms);
        self.store.initialized.set(true);

        let mut outcome = RouteOutcome::Applied;
        for (kind, clock) in clocks {
            let Some(clock) = clock else { continue };
            if first || self.store.clock(kind).with(Option::is_none) {
                outcome.absorb(self.on_clock(kind, Some(clock), frame_timestamp, now_ms));
            }
        }
        outcome
    }

    /// Untyped full state: every slice present is replaced, but clocks and
    /// `match_data` still respect the action lock.
    fn on_raw(&self, mut snapshot: MatchSnapshot, frame_timestamp: Option<i64>, now_ms: i64) -> RouteOutcome {
        let clocks = take_clocks(&mut snapshot);
        let mut outcome = RouteOutcome::Applied;
        if let Some(data) = snapshot.match_data.take() {
            outcome.absorb(self.on_match_data(data, frame_timestamp, now_ms));
        }
        self.store.apply_snapshot(snapshot, false, now_ms);
        for (kind, clock) in clocks {
            if let Some(clock) = clock {
                outcome.absorb(self.on_clock(kind, Some(clock), frame_timestamp, now_ms));
            }
        }
        outcome
    }

    fn on_patch(&self, patch: MatchPatch, frame_timestamp: Option<i64>, now_ms: i64) -> RouteOutcome {
        if patch.is_empty() {
            debug!("match-update without known sub-fields, ignoring");
            return RouteOutcome::Ignored;
        }
        let MatchPatch {
            match_info,
            match_data,
            teams,
            players,
            events,
            scoreboard,
            gameclock,
            playclock,
        } = patch;

        let mut outcome = RouteOutcome::Applied;

        if let Some(info) = match_info {
            self.store.match_info.set(Some(info));
        }
        if let Some(fields) = match_data {
            let stamp = self.local_stamp(frame_timestamp);
            let fences = self.action_lock.enter();
            if fences.should_suppress(LockTarget::MatchData, stamp, now_ms) {
                debug!(?stamp, "match_data suppressed by action lock");
                outcome = RouteOutcome::Suppressed(LockTarget::MatchData);
            } else if let Err(e) = self.store.merge_match_data(&fields) {
                warn!("dropping malformed match_data fields: {e}");
            }
            drop(fences);
        }
        if let Some(teams) = teams {
            self.store.merge_teams(teams);
        }
        if let Some(players) = players {
            self.store.replace_players(players, now_ms);
        }
        if let Some(events) = events {
            self.store.replace_events(events, now_ms);
        }
        if let Some(scoreboard) = scoreboard {
            self.store.scoreboard.set(Some(scoreboard));
        }
        for (kind, clock) in [(ClockKind::Game, gameclock), (ClockKind::Play, playclock)] {
            if let Some(clock) = clock {
                outcome.absorb(self.on_clock(kind, clock, frame_timestamp, now_ms));
            }
        }
        outcome
    }
}

fn take_clocks(snapshot: &mut MatchSnapshot) -> [(ClockKind, Option<ClockPatch>); 2] {
    [
        (ClockKind::Game, snapshot.gameclock.take()),
        (ClockKind::Play, snapshot.playclock.take()),
    ]
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
    use crate::protocol::{ClockDirection, ClockSnapshot, ClockStatus};
    use serde_json::{json, Value};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    fn router() -> (MessageRouter, Arc<MatchStore>, Arc<ActionLock>) {
        let store = Arc::new(MatchStore::new());
        let lock = Arc::new(ActionLock::new(Duration::from_millis(500)));
        (
            MessageRouter::new(Arc::clone(&store), Arc::clone(&lock), 50),
            store,
            lock,
        )
    }

    fn frame(value: Value) -> InboundFrame {
        InboundFrame::decode(&value.to_string()).unwrap()
    }

    #[test]
    fn ping_replies_and_measures_round_trip() {
        let (router, store, _) = router();
        let outcome = router.route(frame(json!({"type": "ping", "timestamp": NOW - 120})), NOW);
        assert_eq!(
            outcome,
            RouteOutcome::Reply(OutboundMessage::Pong {
                timestamp: Some(NOW - 120)
            })
        );
        assert_eq!(store.round_trip_ms.get(), Some(120));
        assert_eq!(store.last_ping_at_ms.get(), Some(NOW));
        assert_eq!(store.server_offset_ms.get(), Some(-120));
    }

    #[test]
    fn clock_update_fills_round_trip_and_clears_on_null() {
        let (router, store, _) = router();
        router.route(
            frame(json!({"type": "gameclock-update", "data": {"gameclock": {"gameclock": 700}}})),
            NOW,
        );
        let clock = store.gameclock.get().unwrap();
        assert_eq!(clock.value, 700);
        assert_eq!(clock.round_trip_ms, Some(50));

        router.route(
            frame(json!({"type": "gameclock-update", "data": {"gameclock": null}})),
            NOW,
        );
        assert_eq!(store.gameclock.get(), None);
    }

    #[test]
    fn full_replacement_slices() {
        let (router, store, _) = router();
        router.route(
            frame(json!({"type": "event-update", "events": [{"id": 1}, {"id": 2}]})),
            NOW,
        );
        router.route(frame(json!({"type": "event-update", "events": [{"id": 3}]})), NOW + 5);
        assert_eq!(store.events.get().len(), 1);
        assert_eq!(store.events.get()[0].id, 3);
        assert_eq!(store.events_updated_at_ms.get(), Some(NOW + 5));

        router.route(
            frame(json!({"type": "players-update", "data": {"players": [{"id": 4, "is_starting": true}]}})),
            NOW,
        );
        assert!(store.players.get()[0].is_starting);

        router.route(
            frame(json!({"type": "statistics-update", "data": {"statistics": {"yards": 120}}})),
            NOW,
        );
        assert_eq!(store.statistics.get(), Some(json!({"yards": 120})));
        assert_eq!(store.statistics_updated_at_ms.get(), Some(NOW));
    }

    #[test]
    fn initial_load_only_populates_once() {
        let (router, store, _) = router();
        let load = json!({
            "type": "initial-load",
            "data": {
                "match": {"id": 7, "title": "Final"},
                "match_data": {"score_team_a": 0},
                "events": [],
                "gameclock": {"gameclock": 720, "gameclock_max": 720}
            }
        });
        router.route(frame(load.clone()), NOW);
        assert!(store.initialized.get());
        assert_eq!(store.gameclock.get().unwrap().value, 720);

        router.route(
            frame(json!({"type": "match-update", "data": {"match_data": {"score_team_a": 14}}})),
            NOW + 1,
        );
        router.route(frame(load), NOW + 2);
        assert_eq!(store.match_data.get().unwrap().score_team_a, Some(14));
    }

    #[test]
    fn match_update_is_field_granular_and_idempotent() {
        let (router, store, _) = router();
        router.route(
            frame(json!({"type": "initial-load", "data": {
                "match_data": {"score_team_a": 3, "score_team_b": 0, "down": "1st"},
                "teams": {"team_a": {"title": "Lions"}, "team_b": {"title": "Bears"}},
                "players": [{"id": 1}]
            }})),
            NOW,
        );

        let update = json!({"type": "match-update", "data": {
            "match_data": {"score_team_b": 7, "distance": "10"},
            "teams": {"team_b": {"title": "Bears", "team_color": "#0b162a"}},
            "events": [{"id": 9, "event_type": "touchdown"}]
        }});
        router.route(frame(update.clone()), NOW + 1);
        let once = (
            store.match_data.get(),
            store.teams.get(),
            store.players.get(),
            store.events.get(),
        );
        let mut events_rx = store.events.subscribe();
        events_rx.borrow_and_update();
        router.route(frame(update), NOW + 2);
        let twice = (
            store.match_data.get(),
            store.teams.get(),
            store.players.get(),
            store.events.get(),
        );
        assert_eq!(once, twice);
        // A repeat changes nothing, so nothing is restamped or woken.
        assert_eq!(store.events_updated_at_ms.get(), Some(NOW + 1));
        assert!(!events_rx.has_changed().unwrap());

        let data = store.match_data.get().unwrap();
        assert_eq!(data.score_team_a, Some(3));
        assert_eq!(data.score_team_b, Some(7));
        assert_eq!(data.down.as_deref(), Some("1st"));
        assert_eq!(data.distance.as_deref(), Some("10"));
        let teams = store.teams.get().unwrap();
        assert_eq!(teams.team_a.unwrap().title, "Lions");
        assert_eq!(teams.team_b.unwrap().team_color.as_deref(), Some("#0b162a"));
        assert_eq!(store.players.get().len(), 1);
    }

    #[test]
    fn unknown_patch_shape_is_ignored() {
        let (router, store, _) = router();
        let outcome = router.route(
            frame(json!({"type": "message-update", "data": {"weather": "rain"}})),
            NOW,
        );
        assert_eq!(outcome, RouteOutcome::Ignored);
        assert_eq!(store.match_data.get(), None);
    }

    #[test]
    fn raw_fallback_replaces_state() {
        let (router, store, _) = router();
        router.route(
            frame(json!({"match_data": {"score_team_a": 21}, "events": [{"id": 1}]})),
            NOW,
        );
        assert_eq!(store.match_data.get().unwrap().score_team_a, Some(21));
        assert_eq!(store.events.get().len(), 1);
    }

    #[test]
    fn stale_echo_suppressed_then_accepted_after_window() {
        let (router, store, lock) = router();
        let optimistic = ClockSnapshot {
            value: 600,
            status: ClockStatus::Running,
            started_at_ms: Some(NOW),
            ..ClockSnapshot::default()
        };
        store.gameclock.set(Some(optimistic.clone()));
        store.server_offset_ms.set(Some(0));
        lock.arm(LockTarget::GameClock, NOW);

        let echo = json!({"type": "gameclock-update", "timestamp": NOW - 40, "data": {"gameclock": {
            "gameclock": 600, "gameclock_status": "stopped"
        }}});
        let outcome = router.route(frame(echo.clone()), NOW + 100);
        assert_eq!(outcome, RouteOutcome::Suppressed(LockTarget::GameClock));
        assert_eq!(store.gameclock.get(), Some(optimistic));

        let outcome = router.route(frame(echo), NOW + 600);
        assert_eq!(outcome, RouteOutcome::Applied);
        assert_eq!(store.gameclock.get().unwrap().status, ClockStatus::Stopped);
    }

    #[test]
    fn post_command_broadcast_passes_the_lock() {
        let (router, store, lock) = router();
        router.route(frame(json!({"type": "ping", "timestamp": NOW - 20})), NOW - 20);
        lock.arm(LockTarget::PlayClock, NOW);
        let outcome = router.route(
            frame(json!({"type": "playclock-update", "data": {"playclock": {
                "playclock": 40, "playclock_status": "running", "server_time_ms": NOW + 30
            }}})),
            NOW + 60,
        );
        assert_eq!(outcome, RouteOutcome::Applied);
        assert!(store.playclock.get().unwrap().is_running());
    }

    #[test]
    fn up_clock_stop_at_zero_is_normalized_on_merge() {
        let (router, store, _) = router();
        store.gameclock.set(Some(ClockSnapshot {
            value: 2_700,
            direction: ClockDirection::Up,
            status: ClockStatus::Running,
            max: Some(2_700),
            ..ClockSnapshot::default()
        }));
        router.route(
            frame(json!({"type": "gameclock-update", "data": {"gameclock": {
                "gameclock": 0, "direction": "up", "gameclock_status": "stopped", "gameclock_max": 2700
            }}})),
            NOW,
        );
        assert_eq!(store.gameclock.get().unwrap().value, 2_700);
    }

    #[test]
    fn patch_clock_respects_lock_but_merges_other_fields() {
        let (router, store, lock) = router();
        lock.arm(LockTarget::GameClock, NOW);
        let outcome = router.route(
            frame(json!({"type": "match-update", "timestamp": NOW - 10, "data": {
                "match_data": {"period": "3rd"},
                "gameclock": {"gameclock": 1}
            }})),
            NOW + 10,
        );
        assert_eq!(outcome, RouteOutcome::Suppressed(LockTarget::GameClock));
        assert_eq!(store.gameclock.get(), None);
        assert_eq!(store.match_data.get().unwrap().period.as_deref(), Some("3rd"));
    }

    #[test]
    fn full_state_frame_clock_respects_lock() {
        let (router, store, lock) = router();
        let optimistic = ClockSnapshot {
            value: 600,
            status: ClockStatus::Running,
            started_at_ms: Some(NOW),
            synced_at_ms: Some(NOW),
            ..ClockSnapshot::default()
        };
        store.gameclock.set(Some(optimistic.clone()));
        store.server_offset_ms.set(Some(0));
        lock.arm(LockTarget::GameClock, NOW);

        let outcome = router.route(
            frame(json!({"type": "full-state", "timestamp": NOW - 40,
                "gameclock": {"gameclock": 600, "gameclock_status": "stopped"}})),
            NOW + 100,
        );
        assert_eq!(outcome, RouteOutcome::Suppressed(LockTarget::GameClock));
        assert_eq!(store.gameclock.get(), Some(optimistic));
    }

    #[test]
    fn full_state_frame_match_data_respects_lock() {
        let (router, store, lock) = router();
        store.server_offset_ms.set(Some(0));
        store.match_data.set(Some(MatchData {
            score_team_a: Some(7),
            ..Default::default()
        }));
        lock.arm(LockTarget::MatchData, NOW);

        let outcome = router.route(
            frame(json!({"timestamp": NOW - 40, "match_data": {"score_team_a": 0},
                "events": [{"id": 5}]})),
            NOW + 100,
        );
        assert_eq!(outcome, RouteOutcome::Suppressed(LockTarget::MatchData));
        assert_eq!(store.match_data.get().unwrap().score_team_a, Some(7));
        // Unfenced slices of the same frame still land.
        assert_eq!(store.events.get().len(), 1);
    }

    #[test]
    fn full_state_frame_clock_is_merged_with_round_trip() {
        let (router, store, _) = router();
        store.gameclock.set(Some(ClockSnapshot {
            value: 100,
            direction: ClockDirection::Up,
            max: Some(2_700),
            ..ClockSnapshot::default()
        }));
        router.route(frame(json!({"gameclock": {"gameclock": 120}})), NOW);
        let clock = store.gameclock.get().unwrap();
        assert_eq!(clock.value, 120);
        assert_eq!(clock.direction, ClockDirection::Up);
        assert_eq!(clock.max, Some(2_700));
        assert_eq!(clock.round_trip_ms, Some(50));
    }

    #[test]
    fn value_only_tick_keeps_direction_status_and_max() {
        let (router, store, _) = router();
        router.route(
            frame(json!({"type": "gameclock-update", "data": {"gameclock": {
                "gameclock": 1000, "direction": "up", "gameclock_status": "running",
                "gameclock_max": 2700
            }}})),
            NOW,
        );
        router.route(
            frame(json!({"type": "gameclock-update", "data": {"gameclock": 1200}})),
            NOW + 1_000,
        );
        let clock = store.gameclock.get().unwrap();
        assert_eq!(clock.value, 1_200);
        assert_eq!(clock.direction, ClockDirection::Up);
        assert_eq!(clock.status, ClockStatus::Running);
        assert_eq!(clock.max, Some(2_700));
    }

    #[test]
    fn up_clock_stop_at_zero_counts_time_since_last_sample() {
        let (router, store, _) = router();
        router.route(
            frame(json!({"type": "gameclock-update", "data": {"gameclock": {
                "gameclock": 2690, "direction": "up", "gameclock_status": "running",
                "gameclock_max": 2700
            }}})),
            NOW,
        );
        router.route(
            frame(json!({"type": "gameclock-update", "data": {"gameclock": {
                "gameclock": 0, "direction": "up", "gameclock_status": "stopped",
                "gameclock_max": 2700
            }}})),
            NOW + 10_000,
        );
        let clock = store.gameclock.get().unwrap();
        assert_eq!(clock.value, 2_700);
        assert_eq!(clock.status, ClockStatus::Stopped);
    }

    #[test]
    fn server_stamps_are_corrected_for_clock_skew() {
        let (router, store, lock) = router();
        // Server clock runs 300ms ahead of ours.
        router.route(frame(json!({"type": "ping", "timestamp": NOW - 500 + 300})), NOW - 500);
        assert_eq!(store.server_offset_ms.get(), Some(300));

        lock.arm(LockTarget::GameClock, NOW);
        let stale = json!({"type": "gameclock-update", "timestamp": NOW + 260,
            "data": {"gameclock": {"gameclock": 600, "gameclock_status": "stopped"}}});
        assert_eq!(
            router.route(frame(stale), NOW + 100),
            RouteOutcome::Suppressed(LockTarget::GameClock)
        );
        assert_eq!(store.gameclock.get(), None);

        let fresh = json!({"type": "gameclock-update", "timestamp": NOW + 320,
            "data": {"gameclock": {"gameclock": 600, "gameclock_status": "running"}}});
        assert_eq!(router.route(frame(fresh), NOW + 120), RouteOutcome::Applied);
        assert!(store.gameclock.get().unwrap().is_running());
    }

    #[test]
    fn stamped_sample_is_suppressed_without_heartbeat() {
        let (router, store, lock) = router();
        lock.arm(LockTarget::PlayClock, NOW);
        let outcome = router.route(
            frame(json!({"type": "playclock-update", "timestamp": NOW + 50,
                "data": {"playclock": {"playclock": 40}}})),
            NOW + 60,
        );
        assert_eq!(outcome, RouteOutcome::Suppressed(LockTarget::PlayClock));
        assert_eq!(store.playclock.get(), None);
    }
}
