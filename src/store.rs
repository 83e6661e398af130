//! The comprehensive match view.
//!
//! [`MatchStore`] holds every slice of the view in its own [`Slot`] so that
//! roster, event log, clocks and scoreboard state can advance on independent
//! cadences. All writes are assignments of whole values or of individual
//! fields; nothing here accumulates, so re-applying a message is a no-op.
//!
//! Only the router (server-originated changes) and the session's optimistic
//! edit path write to the store. Consumers read or subscribe.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::{
    ClockKind, ClockSnapshot, JsonObject, MatchData, MatchEvent, MatchInfo, MatchSnapshot,
    PlayerMatch, ScoreboardSettings, TeamPair,
};
use crate::slot::Slot;

/// Reactive read model for one match.
#[derive(Debug)]
pub struct MatchStore {
    pub match_info: Slot<Option<MatchInfo>>,
    pub match_data: Slot<Option<MatchData>>,
    pub teams: Slot<Option<TeamPair>>,
    pub players: Slot<Vec<PlayerMatch>>,
    pub events: Slot<Vec<MatchEvent>>,
    pub statistics: Slot<Option<Value>>,
    pub scoreboard: Slot<Option<ScoreboardSettings>>,
    pub gameclock: Slot<Option<ClockSnapshot>>,
    pub playclock: Slot<Option<ClockSnapshot>>,
    /// Predicted game-clock reading, written by the session's predictor.
    pub gameclock_display: Slot<Option<u32>>,
    /// Predicted play-clock reading, written by the session's predictor.
    pub playclock_display: Slot<Option<u32>>,
    pub events_updated_at_ms: Slot<Option<i64>>,
    pub players_updated_at_ms: Slot<Option<i64>>,
    pub statistics_updated_at_ms: Slot<Option<i64>>,
    pub last_ping_at_ms: Slot<Option<i64>>,
    pub round_trip_ms: Slot<Option<u32>>,
    /// Server clock minus local clock as seen by the last heartbeat. Turns
    /// server stamps into local instants.
    pub server_offset_ms: Slot<Option<i64>>,
    /// Set once the first full snapshot has been applied.
    pub initialized: Slot<bool>,
}

impl Default for MatchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchStore {
    /// An empty view.
    pub fn new() -> Self {
        Self {
            match_info: Slot::new("match", None),
            match_data: Slot::new("match_data", None),
            teams: Slot::new("teams", None),
            players: Slot::new("players", Vec::new()),
            events: Slot::new("events", Vec::new()),
            statistics: Slot::new("statistics", None),
            scoreboard: Slot::new("scoreboard", None),
            gameclock: Slot::new("gameclock", None),
            playclock: Slot::new("playclock", None),
            gameclock_display: Slot::new("gameclock_display", None),
            playclock_display: Slot::new("playclock_display", None),
            events_updated_at_ms: Slot::new("events_updated_at", None),
            players_updated_at_ms: Slot::new("players_updated_at", None),
            statistics_updated_at_ms: Slot::new("statistics_updated_at", None),
            last_ping_at_ms: Slot::new("last_ping_at", None),
            round_trip_ms: Slot::new("round_trip_ms", None),
            server_offset_ms: Slot::new("server_offset_ms", None),
            initialized: Slot::new("initialized", false),
        }
    }

    /// Return every slice to its empty state. Subscribers stay attached.
    pub fn clear(&self) {
        self.match_info.set(None);
        self.match_data.set(None);
        self.teams.set(None);
        self.players.set(Vec::new());
        self.events.set(Vec::new());
        self.statistics.set(None);
        self.scoreboard.set(None);
        self.gameclock.set(None);
        self.playclock.set(None);
        self.gameclock_display.set(None);
        self.playclock_display.set(None);
        self.events_updated_at_ms.set(None);
        self.players_updated_at_ms.set(None);
        self.statistics_updated_at_ms.set(None);
        self.last_ping_at_ms.set(None);
        self.round_trip_ms.set(None);
        self.server_offset_ms.set(None);
        self.initialized.set(false);
    }

    /// Slot holding the snapshot for `kind`.
    pub fn clock(&self, kind: ClockKind) -> &Slot<Option<ClockSnapshot>> {
        match kind {
            ClockKind::Game => &self.gameclock,
            ClockKind::Play => &self.playclock,
        }
    }

    /// Slot holding the predicted reading for `kind`.
    pub fn clock_display(&self, kind: ClockKind) -> &Slot<Option<u32>> {
        match kind {
            ClockKind::Game => &self.gameclock_display,
            ClockKind::Play => &self.playclock_display,
        }
    }

    /// Convert a server stamp to local time using the heartbeat offset.
    /// `None` until a heartbeat has been seen.
    pub fn to_local_ms(&self, server_ms: i64) -> Option<i64> {
        self.server_offset_ms
            .get()
            .map(|offset| server_ms.saturating_sub(offset))
    }

    /// Replace the event log wholesale. The update stamp only moves when the
    /// log changed.
    pub fn replace_events(&self, events: Vec<MatchEvent>, now_ms: i64) -> bool {
        stamp_if(self.events.set(events), &self.events_updated_at_ms, now_ms)
    }

    /// Replace the roster wholesale. The update stamp only moves when the
    /// roster changed.
    pub fn replace_players(&self, players: Vec<PlayerMatch>, now_ms: i64) -> bool {
        stamp_if(self.players.set(players), &self.players_updated_at_ms, now_ms)
    }

    /// Replace the statistics block wholesale.
    pub fn replace_statistics(&self, statistics: Value, now_ms: i64) -> bool {
        stamp_if(
            self.statistics.set(Some(statistics)),
            &self.statistics_updated_at_ms,
            now_ms,
        )
    }

    /// Merge individual `match_data` fields. Fields absent from `patch` keep
    /// their value.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`](crate::SyncError::Serialization)
    /// if a patched field has the wrong type; the slot is left untouched.
    pub fn merge_match_data(&self, patch: &JsonObject) -> Result<bool> {
        let current = self.match_data.get().unwrap_or_default();
        let merged: MatchData = merge_fields(&current, patch)?;
        Ok(self.match_data.set(Some(merged)))
    }

    /// Merge the announced side(s) of the team pair.
    pub fn merge_teams(&self, incoming: TeamPair) -> bool {
        self.teams.update(|slot| {
            let pair = slot.get_or_insert_with(TeamPair::default);
            let mut changed = false;
            if let Some(team_a) = incoming.team_a {
                if pair.team_a.as_ref() != Some(&team_a) {
                    pair.team_a = Some(team_a);
                    changed = true;
                }
            }
            if let Some(team_b) = incoming.team_b {
                if pair.team_b.as_ref() != Some(&team_b) {
                    pair.team_b = Some(team_b);
                    changed = true;
                }
            }
            changed
        })
    }

    /// Populate every non-clock slice carried by `snapshot`.
    ///
    /// With `only_empty` set, slices that already hold data are kept, so a
    /// late full snapshot cannot roll back state advanced by partial updates.
    /// Clock samples are left to the router, which fences them first.
    pub fn apply_snapshot(&self, snapshot: MatchSnapshot, only_empty: bool, now_ms: i64) {
        let MatchSnapshot {
            match_info,
            match_data,
            teams,
            players,
            events,
            statistics,
            scoreboard,
            gameclock: _,
            playclock: _,
        } = snapshot;

        fill(&self.match_info, match_info, only_empty);
        fill(&self.match_data, match_data, only_empty);
        fill(&self.teams, teams, only_empty);
        fill(&self.scoreboard, scoreboard, only_empty);

        if let Some(players) = players {
            if !only_empty || self.players.with(Vec::is_empty) {
                self.replace_players(players, now_ms);
            }
        }
        if let Some(events) = events {
            if !only_empty || self.events.with(Vec::is_empty) {
                self.replace_events(events, now_ms);
            }
        }
        if let Some(statistics) = statistics {
            if !only_empty || self.statistics.with(Option::is_none) {
                self.replace_statistics(statistics, now_ms);
            }
        }
    }
}

fn stamp_if(changed: bool, stamp: &Slot<Option<i64>>, now_ms: i64) -> bool {
    if changed {
        stamp.set(Some(now_ms));
    }
    changed
}

fn fill<T: Clone + PartialEq>(slot: &Slot<Option<T>>, value: Option<T>, only_empty: bool) {
    if let Some(value) = value {
        if !only_empty || slot.with(Option::is_none) {
            slot.set(Some(value));
        }
    }
}

/// Assign each field of `patch` onto `current` and decode the result.
///
/// Works on any record whose serialized form is a JSON object, including
/// flattened unknown fields.
pub fn merge_fields<T>(current: &T, patch: &JsonObject) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut object = match serde_json::to_value(current)? {
        Value::Object(object) => object,
        _ => JsonObject::new(),
    };
    for (key, value) in patch {
        object.insert(key.clone(), value.clone());
    }
    Ok(serde_json::from_value(Value::Object(object))?)
}
