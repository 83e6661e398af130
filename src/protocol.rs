//! Wire types for the match event stream.
//!
//! The server speaks loosely-shaped JSON: a `type` discriminator, an optional
//! `data` object and type-specific top-level fields, plus legacy frames with
//! no `type` at all. [`InboundFrame::decode`] turns every frame into one
//! variant of the closed [`InboundMessage`] enum before any merge logic runs,
//! so the router never inspects raw JSON.
//!
//! Match-level records keep unknown fields in an `extra` map so a
//! field-granular merge never loses data the client does not model.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

// ── Type aliases ────────────────────────────────────────────────────

/// Server-side match identifier.
pub type MatchId = i64;

/// Loosely-typed JSON object.
pub type JsonObject = Map<String, Value>;

// ── Clocks ──────────────────────────────────────────────────────────

/// Which of the two live clocks a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKind {
    /// Overall period time.
    Game,
    /// Per-play clock.
    Play,
}

impl ClockKind {
    /// Both kinds, game clock first.
    pub const ALL: [ClockKind; 2] = [ClockKind::Game, ClockKind::Play];

    /// JSON field carrying this clock (`gameclock` / `playclock`).
    pub fn field(self) -> &'static str {
        match self {
            ClockKind::Game => "gameclock",
            ClockKind::Play => "playclock",
        }
    }

    /// Envelope `type` announcing an update of this clock.
    pub fn update_type(self) -> &'static str {
        match self {
            ClockKind::Game => "gameclock-update",
            ClockKind::Play => "playclock-update",
        }
    }
}

impl std::fmt::Display for ClockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field())
    }
}

/// Counting direction of a clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClockDirection {
    /// Counts from zero towards `max`.
    Up,
    /// Counts towards zero.
    #[default]
    Down,
}

/// Run state of a clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClockStatus {
    Running,
    Paused,
    #[default]
    Stopped,
}

/// One authoritative (or optimistic) sample of a clock.
///
/// The backend names the value after the clock (`gameclock`, `playclock`),
/// so the value and bound accept those aliases. When `started_at_ms` is set,
/// `value` is the reading at that instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClockSnapshot {
    /// Whole seconds.
    #[serde(default, alias = "gameclock", alias = "playclock")]
    pub value: u32,
    #[serde(default)]
    pub direction: ClockDirection,
    #[serde(
        default,
        alias = "gameclock_status",
        alias = "playclock_status"
    )]
    pub status: ClockStatus,
    /// Natural limit (`None` = unbounded).
    #[serde(default, alias = "gameclock_max", alias = "playclock_max")]
    pub max: Option<u32>,
    #[serde(default, alias = "started_at")]
    pub started_at_ms: Option<i64>,
    #[serde(default, alias = "server_time")]
    pub server_time_ms: Option<i64>,
    /// Round-trip estimate attached to the sample.
    #[serde(default, alias = "rtt_ms")]
    pub round_trip_ms: Option<u32>,
    /// Local instant `value` was last read, when no `started_at_ms` pins it.
    /// Set when a sample is accepted into the store; never on the wire.
    #[serde(skip)]
    pub synced_at_ms: Option<i64>,
}

impl ClockSnapshot {
    /// A stopped clock showing `value`.
    pub fn stopped(value: u32, direction: ClockDirection, max: Option<u32>) -> Self {
        Self {
            value,
            direction,
            status: ClockStatus::Stopped,
            max,
            ..Self::default()
        }
    }

    /// Whether the clock is counting.
    pub fn is_running(&self) -> bool {
        self.status == ClockStatus::Running
    }
}

/// The clock fields one inbound sample carries.
///
/// Correction ticks often carry only the value, so a sample is merged onto
/// the current snapshot (see [`merge_sample`](crate::clock::merge_sample))
/// rather than replacing it. Nullable fields tell an absent field (`None`)
/// from an explicit `null` (`Some(None)`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClockPatch {
    #[serde(
        default,
        alias = "gameclock",
        alias = "playclock",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<ClockDirection>,
    #[serde(
        default,
        alias = "gameclock_status",
        alias = "playclock_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<ClockStatus>,
    #[serde(
        default,
        alias = "gameclock_max",
        alias = "playclock_max",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub max: Option<Option<u32>>,
    #[serde(
        default,
        alias = "started_at",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at_ms: Option<Option<i64>>,
    #[serde(default, alias = "server_time", skip_serializing_if = "Option::is_none")]
    pub server_time_ms: Option<i64>,
    #[serde(default, alias = "rtt_ms", skip_serializing_if = "Option::is_none")]
    pub round_trip_ms: Option<u32>,
}

/// How a freshly reset game clock picks its starting value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitialTimeMode {
    /// Start at the clock's maximum.
    #[default]
    Max,
    /// Start at a configured number of seconds, bounded by the maximum.
    Min,
    /// Start at zero.
    Zero,
}

/// A locally issued clock command.
///
/// Applied optimistically by the session and forwarded as the body of the
/// HTTP clock endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClockCommand {
    Start,
    Pause,
    /// Stop and return to `value`, or to the direction's natural origin.
    Reset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<u32>,
    },
    /// Change any of value, bound or direction.
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<ClockDirection>,
    },
}

// ── Match records ───────────────────────────────────────────────────

/// Match metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MatchInfo {
    #[serde(default)]
    pub id: Option<MatchId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub match_date: Option<String>,
    #[serde(default)]
    pub team_a_id: Option<i64>,
    #[serde(default)]
    pub team_b_id: Option<i64>,
    #[serde(default)]
    pub tournament_id: Option<i64>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// Live scoreboard state: score, period, down and distance, timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MatchData {
    #[serde(default)]
    pub score_team_a: Option<i32>,
    #[serde(default)]
    pub score_team_b: Option<i32>,
    /// Current period label (`"1st"`, `"OT"`, ...).
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub down: Option<String>,
    #[serde(default)]
    pub distance: Option<String>,
    #[serde(default)]
    pub ball_on: Option<i32>,
    #[serde(default)]
    pub timeout_team_a: Option<String>,
    #[serde(default)]
    pub timeout_team_b: Option<String>,
    #[serde(default)]
    pub game_status: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// One side of the match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Team {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub team_color: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// Home/away pair. Either side may be announced alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TeamPair {
    #[serde(default)]
    pub team_a: Option<Team>,
    #[serde(default)]
    pub team_b: Option<Team>,
}

/// A player's entry on a match roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlayerMatch {
    pub id: i64,
    #[serde(default)]
    pub player_id: Option<i64>,
    #[serde(default)]
    pub team_id: Option<i64>,
    #[serde(default)]
    pub match_number: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    /// `false` = bench.
    #[serde(default)]
    pub is_starting: bool,
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// One entry of the play-by-play log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MatchEvent {
    pub id: i64,
    #[serde(default)]
    pub event_number: Option<i32>,
    #[serde(default)]
    pub event_qtr: Option<i32>,
    #[serde(default)]
    pub play_type: Option<String>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// Display toggles for the scoreboard and game-clock reset settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScoreboardSettings {
    #[serde(default)]
    pub is_qtr: Option<bool>,
    #[serde(default)]
    pub is_time: Option<bool>,
    #[serde(default)]
    pub is_playclock: Option<bool>,
    #[serde(default)]
    pub is_downdistance: Option<bool>,
    #[serde(default)]
    pub initial_time_mode: Option<InitialTimeMode>,
    #[serde(default)]
    pub initial_time_min_seconds: Option<u32>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// Full comprehensive view as carried by `initial-load` and by untyped
/// full-state frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MatchSnapshot {
    #[serde(default, rename = "match")]
    pub match_info: Option<MatchInfo>,
    #[serde(default)]
    pub match_data: Option<MatchData>,
    #[serde(default)]
    pub teams: Option<TeamPair>,
    #[serde(default)]
    pub players: Option<Vec<PlayerMatch>>,
    #[serde(default)]
    pub events: Option<Vec<MatchEvent>>,
    #[serde(default)]
    pub statistics: Option<Value>,
    #[serde(default, alias = "scoreboard_data")]
    pub scoreboard: Option<ScoreboardSettings>,
    #[serde(default)]
    pub gameclock: Option<ClockPatch>,
    #[serde(default)]
    pub playclock: Option<ClockPatch>,
}

/// Partial update: only the sub-fields present are merged.
///
/// `match_data` stays a raw object so individual fields can be merged. Clocks
/// distinguish an absent field (`None`) from an explicit `null`
/// (`Some(None)`), which clears the clock.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct MatchPatch {
    #[serde(default, rename = "match")]
    pub match_info: Option<MatchInfo>,
    #[serde(default)]
    pub match_data: Option<JsonObject>,
    #[serde(default)]
    pub teams: Option<TeamPair>,
    #[serde(default)]
    pub players: Option<Vec<PlayerMatch>>,
    #[serde(default)]
    pub events: Option<Vec<MatchEvent>>,
    #[serde(default, alias = "scoreboard_data")]
    pub scoreboard: Option<ScoreboardSettings>,
    #[serde(default, deserialize_with = "present")]
    pub gameclock: Option<Option<ClockPatch>>,
    #[serde(default, deserialize_with = "present")]
    pub playclock: Option<Option<ClockPatch>>,
}

impl MatchPatch {
    /// Whether the patch names none of the known sub-fields.
    pub fn is_empty(&self) -> bool {
        self.match_info.is_none()
            && self.match_data.is_none()
            && self.teams.is_none()
            && self.players.is_none()
            && self.events.is_none()
            && self.scoreboard.is_none()
            && self.gameclock.is_none()
            && self.playclock.is_none()
    }

    /// The clock field for `kind`.
    pub fn clock(&self, kind: ClockKind) -> Option<&Option<ClockPatch>> {
        match kind {
            ClockKind::Game => self.gameclock.as_ref(),
            ClockKind::Play => self.playclock.as_ref(),
        }
    }
}

/// Marks a field as present so an explicit `null` survives as `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ── Messages ────────────────────────────────────────────────────────

/// Typed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Heartbeat; must be answered with a pong echoing `timestamp`.
    Ping { timestamp: Option<i64> },
    /// New sample for one clock. `None` clears the clock.
    ClockUpdate {
        kind: ClockKind,
        clock: Option<ClockPatch>,
    },
    /// Authoritative replacement of the event log.
    EventUpdate { events: Vec<MatchEvent> },
    /// Authoritative replacement of the statistics block.
    StatisticsUpdate { statistics: Value },
    /// Authoritative replacement of the roster.
    PlayersUpdate { players: Vec<PlayerMatch> },
    /// One-time full snapshot sent on subscribe.
    InitialLoad(Box<MatchSnapshot>),
    /// Partial envelope (`match-update` / `message-update`).
    MatchUpdate(Box<MatchPatch>),
    /// Any other shape, applied as raw full-state replacement.
    Raw(Box<MatchSnapshot>),
}

impl InboundMessage {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            InboundMessage::Ping { .. } => "ping",
            InboundMessage::ClockUpdate {
                kind: ClockKind::Game,
                ..
            } => "gameclock-update",
            InboundMessage::ClockUpdate {
                kind: ClockKind::Play,
                ..
            } => "playclock-update",
            InboundMessage::EventUpdate { .. } => "event-update",
            InboundMessage::StatisticsUpdate { .. } => "statistics-update",
            InboundMessage::PlayersUpdate { .. } => "players-update",
            InboundMessage::InitialLoad(_) => "initial-load",
            InboundMessage::MatchUpdate(_) => "match-update",
            InboundMessage::Raw(_) => "raw",
        }
    }
}

/// A decoded frame: envelope metadata plus the typed message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub match_id: Option<MatchId>,
    /// Server send time in epoch milliseconds, when stamped.
    pub timestamp: Option<i64>,
    pub message: InboundMessage,
}

impl InboundFrame {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] when the frame is not a JSON
    /// object or a recognized type's payload does not match its shape.
    pub fn decode(text: &str) -> Result<Self> {
        let object: JsonObject = serde_json::from_str(text)?;
        Self::from_object(object)
    }

    /// Decode an already-parsed JSON object.
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode).
    pub fn from_object(mut object: JsonObject) -> Result<Self> {
        let match_id = object.get("match_id").and_then(Value::as_i64);
        let timestamp = object.get("timestamp").and_then(Value::as_i64);
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);
        object.remove("type");
        let body = match object.remove("data") {
            Some(Value::Object(data)) => data,
            Some(other) => {
                object.insert("data".to_owned(), other);
                object
            }
            None => object,
        };

        let message = match kind.as_deref() {
            Some("ping") => InboundMessage::Ping {
                timestamp: timestamp.or_else(|| body.get("timestamp").and_then(Value::as_i64)),
            },
            Some("gameclock-update") => clock_update(ClockKind::Game, &body)?,
            Some("playclock-update") => clock_update(ClockKind::Play, &body)?,
            Some("event-update") => InboundMessage::EventUpdate {
                events: take_field(body, "events")?,
            },
            Some("statistics-update") => {
                let statistics = match body.get("statistics") {
                    Some(stats) => stats.clone(),
                    None => Value::Object(body),
                };
                InboundMessage::StatisticsUpdate { statistics }
            }
            Some("players-update") => InboundMessage::PlayersUpdate {
                players: take_field(body, "players")?,
            },
            Some("initial-load") => {
                InboundMessage::InitialLoad(Box::new(serde_json::from_value(Value::Object(body))?))
            }
            Some("match-update") | Some("message-update") => {
                InboundMessage::MatchUpdate(Box::new(serde_json::from_value(Value::Object(body))?))
            }
            None if is_legacy_clock(&body) => legacy_clock(body)?,
            other => {
                tracing::debug!(kind = ?other, "unrecognized frame type, applying as full state");
                InboundMessage::Raw(Box::new(serde_json::from_value(Value::Object(body))?))
            }
        };

        Ok(Self {
            match_id,
            timestamp,
            message,
        })
    }
}

fn take_field<T: serde::de::DeserializeOwned>(mut body: JsonObject, key: &str) -> Result<T> {
    let value = body.remove(key).unwrap_or(Value::Null);
    Ok(serde_json::from_value(value)?)
}

/// Decode the clock carried by a clock envelope.
///
/// The clock may arrive as a nested object (`{"gameclock": {...}}`), as an
/// explicit `null`, or flattened into the body (`{"gameclock": 120,
/// "gameclock_max": 720, ...}`).
fn clock_field(kind: ClockKind, body: &JsonObject) -> Result<Option<Option<ClockPatch>>> {
    match body.get(kind.field()) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(nested @ Value::Object(_)) => Ok(Some(Some(serde_json::from_value(nested.clone())?))),
        Some(_) => Ok(Some(Some(serde_json::from_value(Value::Object(
            without_other_clock(kind, body),
        ))?))),
    }
}

/// Copy of `body` without the fields of the other clock, which would
/// otherwise collide on the shared aliases.
fn without_other_clock(kind: ClockKind, body: &JsonObject) -> JsonObject {
    let other = match kind {
        ClockKind::Game => ClockKind::Play,
        ClockKind::Play => ClockKind::Game,
    }
    .field();
    body.iter()
        .filter(|(key, _)| {
            key.as_str() != other
                && !key
                    .strip_prefix(other)
                    .is_some_and(|rest| rest.starts_with('_'))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn clock_update(kind: ClockKind, body: &JsonObject) -> Result<InboundMessage> {
    match clock_field(kind, body)? {
        Some(clock) => Ok(InboundMessage::ClockUpdate { kind, clock }),
        // Envelope without the clock field: treat the body as the clock.
        None if !body.is_empty() => Ok(InboundMessage::ClockUpdate {
            kind,
            clock: Some(serde_json::from_value(Value::Object(without_other_clock(
                kind, body,
            )))?),
        }),
        None => Err(SyncError::Serialization(serde::de::Error::custom(format!(
            "{} without a clock payload",
            kind.update_type()
        )))),
    }
}

fn is_legacy_clock(body: &JsonObject) -> bool {
    ClockKind::ALL
        .iter()
        .any(|kind| body.contains_key(kind.field()))
        && !body.contains_key("match")
        && !body.contains_key("match_data")
}

/// Untyped frame carrying bare `gameclock` / `playclock` fields.
fn legacy_clock(body: JsonObject) -> Result<InboundMessage> {
    let game = clock_field(ClockKind::Game, &body)?;
    let play = clock_field(ClockKind::Play, &body)?;
    Ok(match (game, play) {
        (Some(clock), None) => InboundMessage::ClockUpdate {
            kind: ClockKind::Game,
            clock,
        },
        (None, Some(clock)) => InboundMessage::ClockUpdate {
            kind: ClockKind::Play,
            clock,
        },
        (gameclock, playclock) => InboundMessage::MatchUpdate(Box::new(MatchPatch {
            gameclock,
            playclock,
            ..MatchPatch::default()
        })),
    })
}

/// Message types sent from client to server over the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Heartbeat reply echoing the server's ping timestamp.
    Pong { timestamp: Option<i64> },
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
    use serde_json::json;

    fn decode(value: Value) -> InboundFrame {
        InboundFrame::decode(&value.to_string()).unwrap()
    }

    #[test]
    fn ping_carries_envelope_timestamp() {
        let frame = decode(json!({"type": "ping", "timestamp": 1_700_000_000_000_i64}));
        assert_eq!(frame.timestamp, Some(1_700_000_000_000));
        assert_eq!(
            frame.message,
            InboundMessage::Ping {
                timestamp: Some(1_700_000_000_000)
            }
        );
    }

    #[test]
    fn nested_clock_envelope() {
        let frame = decode(json!({
            "type": "gameclock-update",
            "match_id": 7,
            "data": {"gameclock": {
                "gameclock": 600, "gameclock_max": 720,
                "direction": "down", "gameclock_status": "running",
                "started_at_ms": 10, "server_time_ms": 20
            }}
        }));
        assert_eq!(frame.match_id, Some(7));
        let InboundMessage::ClockUpdate { kind, clock } = frame.message else {
            panic!("expected clock update");
        };
        assert_eq!(kind, ClockKind::Game);
        let clock = clock.unwrap();
        assert_eq!(clock.value, Some(600));
        assert_eq!(clock.max, Some(Some(720)));
        assert_eq!(clock.status, Some(ClockStatus::Running));
        assert_eq!(clock.started_at_ms, Some(Some(10)));
        assert_eq!(clock.server_time_ms, Some(20));
    }

    #[test]
    fn flattened_clock_envelope() {
        let frame = decode(json!({
            "type": "playclock-update",
            "data": {"playclock": 40, "playclock_status": "stopped", "direction": "down"}
        }));
        assert_eq!(
            frame.message,
            InboundMessage::ClockUpdate {
                kind: ClockKind::Play,
                clock: Some(ClockPatch {
                    value: Some(40),
                    direction: Some(ClockDirection::Down),
                    status: Some(ClockStatus::Stopped),
                    ..ClockPatch::default()
                }),
            }
        );
    }

    #[test]
    fn null_clock_clears() {
        let frame = decode(json!({"type": "playclock-update", "data": {"playclock": null}}));
        assert_eq!(
            frame.message,
            InboundMessage::ClockUpdate {
                kind: ClockKind::Play,
                clock: None
            }
        );
    }

    #[test]
    fn legacy_untyped_clock() {
        let frame = decode(json!({"gameclock": {"value": 12, "status": "paused"}}));
        let InboundMessage::ClockUpdate { kind, clock } = frame.message else {
            panic!("expected clock update");
        };
        assert_eq!(kind, ClockKind::Game);
        let clock = clock.unwrap();
        assert_eq!(clock.status, Some(ClockStatus::Paused));
        assert_eq!(clock.direction, None);
    }

    #[test]
    fn legacy_untyped_with_both_clocks_becomes_patch() {
        let frame = decode(json!({"gameclock": {"value": 1}, "playclock": null}));
        let InboundMessage::MatchUpdate(patch) = frame.message else {
            panic!("expected patch");
        };
        assert_eq!(patch.gameclock.unwrap().unwrap().value, Some(1));
        assert_eq!(patch.playclock, Some(None));
    }

    #[test]
    fn flattened_fields_of_both_clocks_do_not_collide() {
        let frame = decode(json!({
            "gameclock": 600, "gameclock_max": 720,
            "playclock": 25, "playclock_status": "running"
        }));
        let InboundMessage::MatchUpdate(patch) = frame.message else {
            panic!("expected patch");
        };
        let game = patch.gameclock.unwrap().unwrap();
        let play = patch.playclock.unwrap().unwrap();
        assert_eq!((game.value, game.max, game.status), (Some(600), Some(Some(720)), None));
        assert_eq!(
            (play.value, play.max, play.status),
            (Some(25), None, Some(ClockStatus::Running))
        );
    }

    #[test]
    fn clock_sample_keeps_only_present_fields() {
        let frame = decode(json!({"type": "gameclock-update", "data": {"gameclock": 1200}}));
        let InboundMessage::ClockUpdate { clock, .. } = frame.message else {
            panic!("expected clock update");
        };
        assert_eq!(
            clock,
            Some(ClockPatch {
                value: Some(1200),
                ..ClockPatch::default()
            })
        );

        let frame = decode(json!({"type": "gameclock-update", "data": {"gameclock": {"gameclock_max": null}}}));
        let InboundMessage::ClockUpdate { clock, .. } = frame.message else {
            panic!("expected clock update");
        };
        assert_eq!(clock.unwrap().max, Some(None));
    }

    #[test]
    fn event_update_accepts_top_level_or_data() {
        let top = decode(json!({"type": "event-update", "events": [{"id": 1}]}));
        let nested = decode(json!({"type": "event-update", "data": {"events": [{"id": 1}]}}));
        assert_eq!(top.message, nested.message);
    }

    #[test]
    fn players_update_requires_list() {
        let err = InboundFrame::decode(r#"{"type":"players-update","data":{}}"#).unwrap_err();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[test]
    fn message_update_is_partial() {
        let frame = decode(json!({
            "type": "message-update",
            "data": {"match_data": {"score_team_a": 7}}
        }));
        let InboundMessage::MatchUpdate(patch) = frame.message else {
            panic!("expected patch");
        };
        assert_eq!(patch.match_data.unwrap()["score_team_a"], json!(7));
        assert!(patch.gameclock.is_none());
        assert!(patch.teams.is_none());
    }

    #[test]
    fn unknown_type_falls_back_to_raw() {
        let frame = decode(json!({"type": "full-state", "match": {"id": 3, "venue": "North"}}));
        let InboundMessage::Raw(snapshot) = frame.message else {
            panic!("expected raw");
        };
        let info = snapshot.match_info.unwrap();
        assert_eq!(info.id, Some(3));
        assert_eq!(info.extra["venue"], json!("North"));
    }

    #[test]
    fn non_object_frame_is_rejected() {
        assert!(InboundFrame::decode("[1,2,3]").is_err());
        assert!(InboundFrame::decode("not json").is_err());
    }

    #[test]
    fn pong_wire_shape() {
        let json = serde_json::to_value(OutboundMessage::Pong {
            timestamp: Some(42),
        })
        .unwrap();
        assert_eq!(json, json!({"type": "pong", "timestamp": 42}));
    }

    #[test]
    fn clock_command_wire_shape() {
        let json = serde_json::to_value(ClockCommand::Reset { value: None }).unwrap();
        assert_eq!(json, json!({"action": "reset"}));
        let json = serde_json::to_value(ClockCommand::Update {
            value: Some(30),
            max: None,
            direction: Some(ClockDirection::Up),
        })
        .unwrap();
        assert_eq!(json, json!({"action": "update", "value": 30, "direction": "up"}));
    }
}
