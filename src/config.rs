//! Session configuration.
//!
//! Everything has a default except the server base URL.
//!
//! ```
//! use matchday_sync::config::SyncConfig;
//! use std::time::Duration;
//!
//! let config = SyncConfig::new("ws://localhost:8000")
//!     .with_action_lock_window(Duration::from_millis(750))
//!     .with_max_retries(5);
//! assert_eq!(config.reconnect.max_retries, 5);
//! ```

use std::time::Duration;

use rand::Rng;

/// Default capacity of the inbound frame channel.
const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default action-lock window.
const DEFAULT_ACTION_LOCK_WINDOW: Duration = Duration::from_millis(500);

/// Roughly one display frame at 60 Hz.
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Round-trip estimate used before the first heartbeat.
pub const DEFAULT_ROUND_TRIP_MS: u32 = 50;

// ── Reconnect policy ────────────────────────────────────────────────

/// Exponential backoff with additive jitter.
///
/// The delay before attempt `n` (1-based) is
/// `min(base_delay * multiplier^(n-1) + jitter, max_delay)` with `jitter`
/// drawn uniformly from `[0, max_jitter)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_jitter: Duration,
    /// Hard cap on any single delay, jitter included.
    pub max_delay: Duration,
    /// Attempts allowed after a drop before the manager gives up.
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_jitter: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Jitter-free delay before attempt `attempt` (1-based), capped at
    /// `max_delay`. Non-decreasing in `attempt`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay before attempt `attempt` with jitter from the thread RNG.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        (self.base_delay_for(attempt) + jitter).min(self.max_delay)
    }

    /// Whether attempt `attempt` (1-based) is within the retry budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

// ── Session configuration ───────────────────────────────────────────

/// Configuration for a [`MatchSession`](crate::session::MatchSession) and its
/// [`ConnectionManager`](crate::connection::ConnectionManager).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// WebSocket base URL, e.g. `ws://host:8000`. The stream path
    /// `/ws/matches/{match_id}/{client_id}` is appended.
    pub base_url: String,
    pub reconnect: ReconnectPolicy,
    /// How long a local edit fences off stale inbound samples.
    pub action_lock_window: Duration,
    /// Cadence of the clock prediction loop.
    pub frame_interval: Duration,
    /// Capacity of the inbound frame channel. Values below 1 are clamped to 1.
    pub frame_channel_capacity: usize,
    /// Time allowed for a graceful transport close before the connection
    /// task is aborted. Zero aborts immediately.
    pub shutdown_timeout: Duration,
    /// Round-trip estimate before the first heartbeat is measured.
    pub default_round_trip_ms: u32,
}

impl SyncConfig {
    /// Create a configuration with the given base URL and default values.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            reconnect: ReconnectPolicy::default(),
            action_lock_window: DEFAULT_ACTION_LOCK_WINDOW,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            frame_channel_capacity: DEFAULT_FRAME_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            default_round_trip_ms: DEFAULT_ROUND_TRIP_MS,
        }
    }

    /// Replace the whole reconnect policy.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.reconnect.max_retries = max_retries;
        self
    }

    /// Set the action-lock window.
    #[must_use]
    pub fn with_action_lock_window(mut self, window: Duration) -> Self {
        self.action_lock_window = window;
        self
    }

    /// Set the prediction frame interval.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Set the inbound frame channel capacity (clamped to at least 1).
    #[must_use]
    pub fn with_frame_channel_capacity(mut self, capacity: usize) -> Self {
        self.frame_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Stream URL for `match_id` as seen by `client_id`.
    pub fn stream_url(&self, match_id: crate::protocol::MatchId, client_id: &uuid::Uuid) -> String {
        format!(
            "{}/ws/matches/{match_id}/{client_id}",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SyncConfig::new("ws://localhost:8000/");
        assert_eq!(config.action_lock_window, Duration::from_millis(500));
        assert_eq!(config.frame_interval, Duration::from_millis(16));
        assert_eq!(config.frame_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.default_round_trip_ms, 50);
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(
            config.stream_url(12, &uuid::Uuid::nil()),
            "ws://localhost:8000/ws/matches/12/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn channel_capacity_is_clamped() {
        let config = SyncConfig::new("ws://x").with_frame_channel_capacity(0);
        assert_eq!(config.frame_channel_capacity, 1);
    }

    #[test]
    fn backoff_grows_by_half_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(1500));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(2250));

        let mut previous = Duration::ZERO;
        for attempt in 1..=60 {
            let delay = policy.base_delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
        assert_eq!(policy.base_delay_for(60), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_one_second_and_cap() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..=20 {
            let base = policy.base_delay_for(attempt);
            let delay = policy.delay_for(attempt);
            assert!(delay >= base);
            assert!(delay < base + Duration::from_secs(1) || delay == policy.max_delay);
            assert!(delay <= Duration::from_secs(30));
        }
    }

    #[test]
    fn retry_budget() {
        let policy = ReconnectPolicy {
            max_retries: 2,
            ..ReconnectPolicy::default()
        };
        assert!(policy.allows(1));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }
}
