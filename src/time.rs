//! Wall-clock time in epoch milliseconds.
//!
//! Server timestamps, action-lock fences and clock predictions are all
//! expressed in epoch milliseconds. Components read "now" through
//! [`TimeSource`] so tests can drive time by hand.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time.
pub trait TimeSource: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// [`TimeSource`] backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Manually driven [`TimeSource`]. Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<AtomicI64>,
}

impl ManualTimeSource {
    /// Start at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    /// Jump to `now_ms`.
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Shared, type-erased time source handle.
pub type SharedTimeSource = Arc<dyn TimeSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clones_share_time() {
        let a = ManualTimeSource::new(1_000);
        let b = a.clone();
        a.advance(250);
        assert_eq!(b.now_ms(), 1_250);
        b.set(10);
        assert_eq!(a.now_ms(), 10);
    }

    #[test]
    fn system_time_is_after_2020() {
        assert!(SystemTimeSource.now_ms() > 1_577_836_800_000);
    }
}
