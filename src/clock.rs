//! Clock prediction.
//!
//! The server only pushes clock samples on transitions (start, pause, reset)
//! and on occasional correction ticks. [`ClockPredictor`] turns the latest
//! sample into a smooth per-frame reading; the pure helpers in this module
//! ([`predict`], [`merge_sample`], [`normalize_incoming`], [`apply_command`],
//! [`initial_seconds`]) hold all of the arithmetic so it can be tested
//! without a runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::DEFAULT_ROUND_TRIP_MS;
use crate::lock;
use crate::protocol::{
    ClockCommand, ClockDirection, ClockPatch, ClockSnapshot, ClockStatus, InitialTimeMode,
};
use crate::time::SharedTimeSource;

/// How close (in seconds) to its maximum a running up-clock must be for a
/// stopped-at-zero sample to be read as "reached the maximum".
pub const NEAR_MAX_WINDOW_SECS: u32 = 3;

// ── Pure helpers ────────────────────────────────────────────────────

/// A predicted reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    pub value: u32,
    /// No further frames are needed: the clock is not running or has hit
    /// its natural limit.
    pub terminal: bool,
}

/// Milliseconds the clock has been counting since `snapshot.value` was read.
///
/// With both `started_at_ms` and `server_time_ms` the server timeline is
/// used, offset by half the round trip. With only `started_at_ms` the local
/// and server clocks are assumed to agree. Otherwise time is measured from
/// `synced_at_ms`, the local instant the sample was accepted.
pub fn elapsed_ms(snapshot: &ClockSnapshot, synced_at_ms: i64, now_ms: i64) -> i64 {
    let since_sync = now_ms.saturating_sub(synced_at_ms).max(0);
    match (snapshot.started_at_ms, snapshot.server_time_ms) {
        (Some(started), Some(server_now)) => {
            let half_rtt = i64::from(snapshot.round_trip_ms.unwrap_or(DEFAULT_ROUND_TRIP_MS)) / 2;
            server_now
                .saturating_add(half_rtt)
                .saturating_add(since_sync)
                .saturating_sub(started)
                .max(0)
        }
        (Some(started), None) => now_ms.saturating_sub(started).max(0),
        (None, _) => since_sync,
    }
}

/// Reading of `snapshot` at `now_ms`. Whole elapsed seconds only.
pub fn predict(snapshot: &ClockSnapshot, synced_at_ms: i64, now_ms: i64) -> Prediction {
    if !snapshot.is_running() {
        return Prediction {
            value: snapshot.value,
            terminal: true,
        };
    }
    let elapsed = u32::try_from(elapsed_ms(snapshot, synced_at_ms, now_ms) / 1000).unwrap_or(u32::MAX);
    match snapshot.direction {
        ClockDirection::Down => {
            let value = snapshot.value.saturating_sub(elapsed);
            Prediction {
                value,
                terminal: value == 0,
            }
        }
        ClockDirection::Up => {
            let value = snapshot.value.saturating_add(elapsed);
            match snapshot.max {
                Some(max) if value >= max => Prediction {
                    value: max,
                    terminal: true,
                },
                _ => Prediction {
                    value,
                    terminal: false,
                },
            }
        }
    }
}

/// Reading of `snapshot` at `now_ms`, measured from the instant it was
/// accepted (`synced_at_ms`, or `now_ms` if it never was).
pub fn current_value(snapshot: &ClockSnapshot, now_ms: i64) -> u32 {
    let synced_at = snapshot.synced_at_ms.unwrap_or(now_ms);
    predict(snapshot, synced_at, now_ms).value
}

/// Merge an inbound sample onto the current snapshot at `now_ms`.
///
/// Fields the sample leaves out keep their current value. A sample with a
/// new `value` is a fresh reading: unless it also says when the clock
/// started, the old start instant and server time no longer describe it. A
/// running clock stopped without a value keeps the reading it had reached.
pub fn merge_sample(current: Option<&ClockSnapshot>, patch: &ClockPatch, now_ms: i64) -> ClockSnapshot {
    let mut next = current.cloned().unwrap_or_default();
    let stops = patch
        .status
        .is_some_and(|status| status != ClockStatus::Running);
    let rebased = match patch.value {
        Some(value) => {
            next.value = value;
            true
        }
        None if next.is_running() && stops => {
            next.value = current_value(&next, now_ms);
            true
        }
        None => false,
    };
    if rebased {
        next.started_at_ms = None;
        next.server_time_ms = None;
    }

    if let Some(direction) = patch.direction {
        next.direction = direction;
    }
    if let Some(status) = patch.status {
        next.status = status;
    }
    if let Some(max) = patch.max {
        next.max = max;
    }
    if let Some(started_at) = patch.started_at_ms {
        next.started_at_ms = started_at;
    }
    if let Some(server_time) = patch.server_time_ms {
        next.server_time_ms = Some(server_time);
    }
    if let Some(round_trip) = patch.round_trip_ms {
        next.round_trip_ms = Some(round_trip);
    }
    if rebased || patch.server_time_ms.is_some() || next.synced_at_ms.is_none() {
        next.synced_at_ms = Some(now_ms);
    }
    next
}

/// Starting value of a reset game clock.
///
/// `Min` uses `min_seconds` bounded by `max`; a missing `min_seconds` falls
/// back to `max`.
pub fn initial_seconds(max: u32, mode: InitialTimeMode, min_seconds: Option<u32>) -> u32 {
    match mode {
        InitialTimeMode::Max => max,
        InitialTimeMode::Min => min_seconds.map_or(max, |secs| secs.min(max)),
        InitialTimeMode::Zero => 0,
    }
}

/// Repair an up-clock sample that reports "stopped at 0" right after the
/// clock was running near its maximum.
///
/// The backend stops a bounded up-clock at its limit but has been observed
/// to publish the stop as value 0. Down clocks and samples that do not
/// follow a near-max running state pass through untouched.
pub fn normalize_incoming(
    current: Option<&ClockSnapshot>,
    incoming: ClockSnapshot,
    now_ms: i64,
) -> ClockSnapshot {
    let Some(current) = current else {
        return incoming;
    };
    let stopped_at_zero = incoming.direction == ClockDirection::Up
        && incoming.status == ClockStatus::Stopped
        && incoming.value == 0;
    if !stopped_at_zero || current.direction != ClockDirection::Up || !current.is_running() {
        return incoming;
    }
    let Some(max) = incoming.max.or(current.max) else {
        return incoming;
    };
    let reading = current_value(current, now_ms);
    if reading.saturating_add(NEAR_MAX_WINDOW_SECS) < max {
        return incoming;
    }
    debug!(reading, max, "up-clock stopped at zero near its max, holding at max");
    ClockSnapshot {
        value: max,
        ..incoming
    }
}

/// Apply a local command to `snapshot` at `now_ms`.
///
/// Running clocks are rebased: the new snapshot carries the current reading
/// as `value` and `now_ms` as `started_at_ms`, with no server time, so the
/// predictor measures from the local instant of the edit.
pub fn apply_command(snapshot: &ClockSnapshot, command: &ClockCommand, now_ms: i64) -> ClockSnapshot {
    let reading = current_value(snapshot, now_ms);
    let mut next = ClockSnapshot {
        value: reading,
        server_time_ms: None,
        synced_at_ms: Some(now_ms),
        ..snapshot.clone()
    };
    match command {
        ClockCommand::Start => {
            if !snapshot.is_running() {
                next.status = ClockStatus::Running;
            }
            next.started_at_ms = Some(now_ms);
        }
        ClockCommand::Pause => {
            next.status = ClockStatus::Paused;
            next.started_at_ms = None;
        }
        ClockCommand::Reset { value } => {
            next.status = ClockStatus::Stopped;
            next.started_at_ms = None;
            next.value = value.unwrap_or(match snapshot.direction {
                ClockDirection::Down => snapshot.max.unwrap_or(snapshot.value),
                ClockDirection::Up => 0,
            });
        }
        ClockCommand::Update {
            value,
            max,
            direction,
        } => {
            if let Some(value) = value {
                next.value = *value;
            }
            if let Some(max) = max {
                next.max = Some(*max);
            }
            if let Some(direction) = direction {
                next.direction = *direction;
            }
            next.started_at_ms = next.is_running().then_some(now_ms);
        }
    }
    next
}

// ── Predictor ───────────────────────────────────────────────────────

/// Callback receiving one reading per frame.
pub type TickFn = Arc<dyn Fn(u32) + Send + Sync>;

/// Predictor run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorState {
    Idle,
    Predicting,
}

#[derive(Default)]
struct Inner {
    /// Bumped by every `sync`/`destroy`; frames from older loops are dropped.
    generation: u64,
    frame_loop: Option<JoinHandle<()>>,
}

/// Per-frame clock reading driven by the latest accepted snapshot.
///
/// [`sync`](Self::sync) is the only input. A stopped or paused snapshot is
/// emitted once; a running one starts a frame loop that emits a prediction
/// every `frame_interval` until the clock hits its natural limit. Each
/// `sync` supersedes the previous loop; after `sync` returns the old loop
/// emits nothing more.
pub struct ClockPredictor {
    time: SharedTimeSource,
    frame_interval: Duration,
    on_tick: TickFn,
    inner: Arc<Mutex<Inner>>,
}

impl ClockPredictor {
    /// Create an idle predictor.
    pub fn new(
        time: SharedTimeSource,
        frame_interval: Duration,
        on_tick: impl Fn(u32) + Send + Sync + 'static,
    ) -> Self {
        Self {
            time,
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            on_tick: Arc::new(on_tick),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Feed a newly accepted snapshot.
    ///
    /// Time is measured from the snapshot's `synced_at_ms` when it has one.
    pub fn sync(&self, snapshot: ClockSnapshot) {
        let synced_at = snapshot
            .synced_at_ms
            .unwrap_or_else(|| self.time.now_ms());
        let mut inner = lock(&self.inner);
        inner.generation = inner.generation.wrapping_add(1);
        if let Some(previous) = inner.frame_loop.take() {
            previous.abort();
        }

        if !snapshot.is_running() {
            (self.on_tick)(snapshot.value);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("clock predictor used outside a tokio runtime, emitting a single reading");
            (self.on_tick)(predict(&snapshot, synced_at, synced_at).value);
            return;
        };

        inner.frame_loop = Some(runtime.spawn(frame_loop(
            snapshot,
            synced_at,
            inner.generation,
            Arc::clone(&self.time),
            self.frame_interval,
            Arc::clone(&self.on_tick),
            Arc::clone(&self.inner),
        )));
    }

    /// Current run state.
    pub fn state(&self) -> PredictorState {
        let inner = lock(&self.inner);
        match &inner.frame_loop {
            Some(handle) if !handle.is_finished() => PredictorState::Predicting,
            _ => PredictorState::Idle,
        }
    }

    /// Whether a frame loop is active.
    pub fn is_predicting(&self) -> bool {
        self.state() == PredictorState::Predicting
    }

    /// Stop any frame loop for good. Idempotent.
    pub fn destroy(&self) {
        let mut inner = lock(&self.inner);
        inner.generation = inner.generation.wrapping_add(1);
        if let Some(handle) = inner.frame_loop.take() {
            handle.abort();
        }
    }
}

impl Drop for ClockPredictor {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for ClockPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockPredictor")
            .field("frame_interval", &self.frame_interval)
            .field("state", &self.state())
            .finish()
    }
}

async fn frame_loop(
    snapshot: ClockSnapshot,
    synced_at: i64,
    generation: u64,
    time: SharedTimeSource,
    frame_interval: Duration,
    on_tick: TickFn,
    inner: Arc<Mutex<Inner>>,
) {
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let prediction = predict(&snapshot, synced_at, time.now_ms());
        {
            // Emit under the lock so a concurrent `sync` cannot interleave.
            let guard = lock(&inner);
            if guard.generation != generation {
                return;
            }
            on_tick(prediction.value);
        }
        if prediction.terminal {
            debug!(value = prediction.value, "clock reached its limit, prediction halted");
            return;
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
    use crate::time::ManualTimeSource;

    const NOW: i64 = 1_700_000_000_000;

    fn running(value: u32, direction: ClockDirection, max: Option<u32>) -> ClockSnapshot {
        ClockSnapshot {
            value,
            direction,
            status: ClockStatus::Running,
            max,
            ..ClockSnapshot::default()
        }
    }

    fn recording_predictor(
        time: &ManualTimeSource,
    ) -> (ClockPredictor, Arc<std::sync::Mutex<Vec<u32>>>) {
        let ticks = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let predictor = ClockPredictor::new(
            Arc::new(time.clone()),
            Duration::from_millis(16),
            move |value| sink.lock().unwrap().push(value),
        );
        (predictor, ticks)
    }

    // ── Pure helpers ────────────────────────────────────────────────

    #[test]
    fn stopped_prediction_is_raw_value() {
        for status in [ClockStatus::Stopped, ClockStatus::Paused] {
            let snapshot = ClockSnapshot {
                value: 42,
                status,
                started_at_ms: Some(NOW - 10_000),
                ..ClockSnapshot::default()
            };
            assert_eq!(predict(&snapshot, NOW - 5_000, NOW).value, 42);
        }
    }

    #[test]
    fn down_clock_counts_whole_seconds() {
        let snapshot = running(10, ClockDirection::Down, Some(10));
        assert_eq!(predict(&snapshot, NOW, NOW + 999).value, 10);
        assert_eq!(predict(&snapshot, NOW, NOW + 1_000).value, 9);
        let end = predict(&snapshot, NOW, NOW + 60_000);
        assert_eq!(end, Prediction { value: 0, terminal: true });
    }

    #[test]
    fn up_clock_stops_at_max() {
        let snapshot = running(2_690, ClockDirection::Up, Some(2_700));
        assert_eq!(
            predict(&snapshot, NOW, NOW + 5_000),
            Prediction { value: 2_695, terminal: false }
        );
        assert_eq!(
            predict(&snapshot, NOW, NOW + 20_000),
            Prediction { value: 2_700, terminal: true }
        );
    }

    #[test]
    fn server_timeline_includes_half_round_trip() {
        let snapshot = ClockSnapshot {
            started_at_ms: Some(NOW - 10_000),
            server_time_ms: Some(NOW - 1_000),
            round_trip_ms: Some(2_000),
            ..running(100, ClockDirection::Down, None)
        };
        // 9s on the server at sync, +1s half round trip, +0.5s locally.
        assert_eq!(elapsed_ms(&snapshot, NOW, NOW + 500), 10_500);
        assert_eq!(predict(&snapshot, NOW, NOW + 500).value, 90);
    }

    #[test]
    fn initial_time_calculation() {
        assert_eq!(initial_seconds(2_700, InitialTimeMode::Min, Some(900)), 900);
        assert_eq!(initial_seconds(2_700, InitialTimeMode::Min, Some(5_000)), 2_700);
        assert_eq!(initial_seconds(2_700, InitialTimeMode::Zero, Some(900)), 0);
        assert_eq!(initial_seconds(720, InitialTimeMode::Zero, None), 0);
        assert_eq!(initial_seconds(2_700, InitialTimeMode::Max, Some(900)), 2_700);
        assert_eq!(initial_seconds(2_700, InitialTimeMode::Min, None), 2_700);
    }

    #[test]
    fn up_clock_stop_at_zero_near_max_is_normalized() {
        let current = running(2_700, ClockDirection::Up, Some(2_700));
        let incoming = ClockSnapshot::stopped(0, ClockDirection::Up, Some(2_700));
        let normalized = normalize_incoming(Some(&current), incoming, NOW);
        assert_eq!(normalized.value, 2_700);
        assert_eq!(normalized.status, ClockStatus::Stopped);
    }

    #[test]
    fn down_clock_stop_at_zero_passes_through() {
        let current = running(1, ClockDirection::Down, None);
        let incoming = ClockSnapshot::stopped(0, ClockDirection::Down, None);
        assert_eq!(normalize_incoming(Some(&current), incoming.clone(), NOW), incoming);
    }

    #[test]
    fn up_clock_reset_far_from_max_passes_through() {
        let current = running(600, ClockDirection::Up, Some(2_700));
        let incoming = ClockSnapshot::stopped(0, ClockDirection::Up, Some(2_700));
        assert_eq!(normalize_incoming(Some(&current), incoming.clone(), NOW), incoming);

        let paused = ClockSnapshot {
            status: ClockStatus::Paused,
            ..current.clone()
        };
        let near_max_paused = ClockSnapshot {
            value: 2_699,
            ..paused
        };
        assert_eq!(
            normalize_incoming(Some(&near_max_paused), incoming.clone(), NOW),
            incoming
        );
        assert_eq!(normalize_incoming(None, incoming.clone(), NOW), incoming);
    }

    #[test]
    fn up_clock_normalization_uses_predicted_reading() {
        // Started 2,698s of play ago from zero: effectively at max.
        let current = ClockSnapshot {
            started_at_ms: Some(NOW - 2_698_000),
            ..running(0, ClockDirection::Up, Some(2_700))
        };
        let incoming = ClockSnapshot::stopped(0, ClockDirection::Up, Some(2_700));
        assert_eq!(normalize_incoming(Some(&current), incoming, NOW).value, 2_700);
    }

    #[test]
    fn up_clock_normalization_counts_time_since_acceptance() {
        // No start instant: the reading advances from when it was accepted.
        let current = ClockSnapshot {
            synced_at_ms: Some(NOW),
            ..running(2_690, ClockDirection::Up, Some(2_700))
        };
        let incoming = ClockSnapshot::stopped(0, ClockDirection::Up, Some(2_700));
        assert_eq!(
            normalize_incoming(Some(&current), incoming.clone(), NOW + 10_000).value,
            2_700
        );
        // Right after acceptance it is still 10s short of max.
        assert_eq!(normalize_incoming(Some(&current), incoming, NOW).value, 0);
    }

    #[test]
    fn value_only_sample_keeps_the_rest_of_the_clock() {
        let current = ClockSnapshot {
            started_at_ms: Some(NOW - 4_000),
            ..running(1_000, ClockDirection::Up, Some(2_700))
        };
        let tick = ClockPatch {
            value: Some(1_200),
            ..ClockPatch::default()
        };
        let merged = merge_sample(Some(&current), &tick, NOW);
        assert_eq!(merged.value, 1_200);
        assert_eq!(merged.direction, ClockDirection::Up);
        assert_eq!(merged.status, ClockStatus::Running);
        assert_eq!(merged.max, Some(2_700));
        // The new reading counts from now, not from the old start.
        assert_eq!(merged.started_at_ms, None);
        assert_eq!(merged.synced_at_ms, Some(NOW));
        assert_eq!(predict(&merged, NOW, NOW + 3_000).value, 1_203);
    }

    #[test]
    fn sample_fields_and_explicit_nulls_are_applied() {
        let current = ClockSnapshot::stopped(40, ClockDirection::Down, Some(40));
        let patch = ClockPatch {
            status: Some(ClockStatus::Running),
            max: Some(None),
            round_trip_ms: Some(90),
            ..ClockPatch::default()
        };
        let merged = merge_sample(Some(&current), &patch, NOW);
        assert_eq!(merged.value, 40);
        assert!(merged.is_running());
        assert_eq!(merged.max, None);
        assert_eq!(merged.round_trip_ms, Some(90));
        assert_eq!(merged.synced_at_ms, Some(NOW));

        // From nothing, absent fields take their defaults.
        let fresh = merge_sample(None, &ClockPatch::default(), NOW);
        assert_eq!(
            fresh,
            ClockSnapshot {
                synced_at_ms: Some(NOW),
                ..ClockSnapshot::default()
            }
        );
    }

    #[test]
    fn stop_without_value_keeps_reached_reading() {
        let current = ClockSnapshot {
            synced_at_ms: Some(NOW),
            ..running(30, ClockDirection::Down, Some(40))
        };
        let stop = ClockPatch {
            status: Some(ClockStatus::Paused),
            ..ClockPatch::default()
        };
        let merged = merge_sample(Some(&current), &stop, NOW + 7_500);
        assert_eq!(merged.value, 23);
        assert_eq!(merged.status, ClockStatus::Paused);
        assert_eq!(merged.synced_at_ms, Some(NOW + 7_500));
    }

    #[test]
    fn commands_rebase_running_clock() {
        let clock = ClockSnapshot {
            started_at_ms: Some(NOW - 5_000),
            ..running(60, ClockDirection::Down, Some(60))
        };

        let paused = apply_command(&clock, &ClockCommand::Pause, NOW);
        assert_eq!(paused.value, 55);
        assert_eq!(paused.status, ClockStatus::Paused);
        assert_eq!(paused.started_at_ms, None);

        let restarted = apply_command(&paused, &ClockCommand::Start, NOW + 1_000);
        assert_eq!(restarted.value, 55);
        assert!(restarted.is_running());
        assert_eq!(restarted.started_at_ms, Some(NOW + 1_000));

        let reset = apply_command(&restarted, &ClockCommand::Reset { value: None }, NOW + 2_000);
        assert_eq!(reset.value, 60);
        assert_eq!(reset.status, ClockStatus::Stopped);

        let up = apply_command(
            &reset,
            &ClockCommand::Update {
                value: None,
                max: Some(90),
                direction: Some(ClockDirection::Up),
            },
            NOW,
        );
        assert_eq!(up.direction, ClockDirection::Up);
        assert_eq!(up.max, Some(90));
        assert_eq!(
            apply_command(&up, &ClockCommand::Reset { value: None }, NOW).value,
            0
        );
    }

    // ── Predictor ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn stopped_sync_emits_raw_value_without_loop() {
        let time = ManualTimeSource::new(NOW);
        let (predictor, ticks) = recording_predictor(&time);

        for value in [30, 12, 0, 99] {
            predictor.sync(ClockSnapshot::stopped(value, ClockDirection::Down, None));
            assert!(!predictor.is_predicting());
        }
        time.advance(10_000);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*ticks.lock().unwrap(), vec![30, 12, 0, 99]);
    }

    #[tokio::test(start_paused = true)]
    async fn down_clock_auto_stops_at_zero() {
        let time = ManualTimeSource::new(NOW);
        let (predictor, ticks) = recording_predictor(&time);

        predictor.sync(ClockSnapshot {
            started_at_ms: Some(NOW - 1_000),
            ..running(1, ClockDirection::Down, None)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*ticks.lock().unwrap(), vec![0]);
        assert_eq!(predictor.state(), PredictorState::Idle);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn running_clock_follows_wall_time() {
        let time = ManualTimeSource::new(NOW);
        let (predictor, ticks) = recording_predictor(&time);

        predictor.sync(running(30, ClockDirection::Down, Some(30)));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(predictor.is_predicting());
        assert_eq!(ticks.lock().unwrap().last(), Some(&30));

        time.advance(2_500);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(ticks.lock().unwrap().last(), Some(&28));
        assert!(ticks.lock().unwrap().len() >= 3);

        predictor.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_sync_freezes_and_cancels_loop() {
        let time = ManualTimeSource::new(NOW);
        let (predictor, ticks) = recording_predictor(&time);

        predictor.sync(running(30, ClockDirection::Down, Some(30)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        predictor.sync(ClockSnapshot::stopped(25, ClockDirection::Down, Some(30)));
        let after_stop = ticks.lock().unwrap().len();
        assert_eq!(ticks.lock().unwrap().last(), Some(&25));
        assert!(!predictor.is_predicting());

        time.advance(5_000);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.lock().unwrap().len(), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn up_clock_halts_at_max() {
        let time = ManualTimeSource::new(NOW);
        let (predictor, ticks) = recording_predictor(&time);

        predictor.sync(running(10, ClockDirection::Up, Some(12)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        time.advance(5_000);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(ticks.lock().unwrap().last(), Some(&12));
        assert!(!predictor.is_predicting());
    }

    #[tokio::test(start_paused = true)]
    async fn later_sync_supersedes_running_loop() {
        let time = ManualTimeSource::new(NOW);
        let (predictor, ticks) = recording_predictor(&time);

        predictor.sync(running(100, ClockDirection::Down, None));
        tokio::time::sleep(Duration::from_millis(40)).await;
        predictor.sync(running(50, ClockDirection::Down, None));
        ticks.lock().unwrap().clear();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let seen = ticks.lock().unwrap().clone();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|&v| v == 50), "stale frames leaked: {seen:?}");
        predictor.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_halts_loop() {
        let time = ManualTimeSource::new(NOW);
        let (predictor, ticks) = recording_predictor(&time);

        predictor.sync(running(100, ClockDirection::Up, None));
        tokio::time::sleep(Duration::from_millis(40)).await;
        predictor.destroy();
        predictor.destroy();
        let count = ticks.lock().unwrap().len();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.lock().unwrap().len(), count);
        assert_eq!(predictor.state(), PredictorState::Idle);
    }

    #[test]
    fn sync_outside_runtime_emits_once() {
        let time = ManualTimeSource::new(NOW);
        let (predictor, ticks) = recording_predictor(&time);
        predictor.sync(running(7, ClockDirection::Down, None));
        assert_eq!(*ticks.lock().unwrap(), vec![7]);
        assert!(!predictor.is_predicting());
    }
}
