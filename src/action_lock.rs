//! Echo suppression for optimistic edits.
//!
//! The server broadcasts every state change to all subscribers, including
//! the view that issued it. A delayed broadcast of the *previous* state can
//! land after the view has already applied its own edit locally. Arming the
//! lock for a target when a local edit is applied makes the router drop
//! inbound samples for that target for a short window, unless the sample is
//! stamped at or after the edit.
//!
//! Checking a sample and writing it, or arming and writing the optimistic
//! value, must happen under one [`FenceGuard`]. Otherwise the router and an
//! edit running on another worker thread can interleave and the stale sample
//! lands after the edit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::lock;
use crate::protocol::ClockKind;

/// Entity a local edit can fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    GameClock,
    PlayClock,
    MatchData,
}

impl From<ClockKind> for LockTarget {
    fn from(kind: ClockKind) -> Self {
        match kind {
            ClockKind::Game => LockTarget::GameClock,
            ClockKind::Play => LockTarget::PlayClock,
        }
    }
}

/// Fence recorded for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fence {
    pub armed_until_ms: i64,
    pub last_local_command_at_ms: i64,
}

/// Per-target fencing tokens with a fixed window.
///
/// Arming never fails and always moves the fence forward, so a newer local
/// command is never blocked; the fence only filters inbound samples.
#[derive(Debug)]
pub struct ActionLock {
    window_ms: i64,
    fences: Mutex<HashMap<LockTarget, Fence>>,
}

impl ActionLock {
    /// Create a lock with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            fences: Mutex::new(HashMap::new()),
        }
    }

    /// Take exclusive access to every fence until the guard is dropped.
    ///
    /// Never call another `ActionLock` method while holding the guard.
    pub fn enter(&self) -> FenceGuard<'_> {
        FenceGuard {
            window_ms: self.window_ms,
            fences: lock(&self.fences),
        }
    }

    /// Record a local command on `target` at `now_ms` and (re)arm the window.
    pub fn arm(&self, target: LockTarget, now_ms: i64) -> Fence {
        self.enter().arm(target, now_ms)
    }

    /// The fence for `target`, armed or not.
    pub fn fence(&self, target: LockTarget) -> Option<Fence> {
        self.enter().fence(target)
    }

    /// Whether `target` is inside its window at `now_ms`.
    pub fn is_armed(&self, target: LockTarget, now_ms: i64) -> bool {
        self.fence(target)
            .is_some_and(|fence| now_ms < fence.armed_until_ms)
    }

    /// See [`FenceGuard::should_suppress`].
    pub fn should_suppress(&self, target: LockTarget, sample_ms: Option<i64>, now_ms: i64) -> bool {
        self.enter().should_suppress(target, sample_ms, now_ms)
    }
}

/// Held access to the fences of one [`ActionLock`].
pub struct FenceGuard<'a> {
    window_ms: i64,
    fences: MutexGuard<'a, HashMap<LockTarget, Fence>>,
}

impl FenceGuard<'_> {
    /// Record a local command on `target` at `now_ms` and (re)arm the window.
    pub fn arm(&mut self, target: LockTarget, now_ms: i64) -> Fence {
        let fence = Fence {
            armed_until_ms: now_ms.saturating_add(self.window_ms),
            last_local_command_at_ms: now_ms,
        };
        self.fences.insert(target, fence);
        tracing::debug!(?target, until = fence.armed_until_ms, "action lock armed");
        fence
    }

    /// The fence for `target`, armed or not.
    pub fn fence(&self, target: LockTarget) -> Option<Fence> {
        self.fences.get(&target).copied()
    }

    /// Whether an inbound sample for `target` must be dropped at `now_ms`.
    ///
    /// `sample_ms` is the sample's stamp in local time. While armed, samples
    /// stamped before the last local command are dropped, and so are
    /// samples whose stamp is unknown or cannot be placed on the local
    /// clock. Samples stamped at or after the command reflect it and pass.
    pub fn should_suppress(&self, target: LockTarget, sample_ms: Option<i64>, now_ms: i64) -> bool {
        let Some(fence) = self.fence(target) else {
            return false;
        };
        if now_ms >= fence.armed_until_ms {
            return false;
        }
        match sample_ms {
            Some(stamp) => stamp < fence.last_local_command_at_ms,
            None => true,
        }
    }
}

impl std::fmt::Debug for FenceGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FenceGuard")
            .field("fences", &*self.fences)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn unarmed_never_suppresses() {
        let lock = ActionLock::new(Duration::from_millis(500));
        assert!(!lock.is_armed(LockTarget::GameClock, NOW));
        assert!(!lock.should_suppress(LockTarget::GameClock, None, NOW));
    }

    #[test]
    fn stale_echo_inside_window_is_suppressed() {
        let lock = ActionLock::new(Duration::from_millis(500));
        lock.arm(LockTarget::GameClock, NOW);

        assert!(lock.is_armed(LockTarget::GameClock, NOW + 499));
        assert!(lock.should_suppress(LockTarget::GameClock, Some(NOW - 20), NOW + 100));
        assert!(lock.should_suppress(LockTarget::GameClock, None, NOW + 100));
        // Other targets are unaffected.
        assert!(!lock.should_suppress(LockTarget::PlayClock, Some(NOW - 20), NOW + 100));
    }

    #[test]
    fn sample_stamped_after_command_passes() {
        let lock = ActionLock::new(Duration::from_millis(500));
        lock.arm(LockTarget::PlayClock, NOW);
        assert!(!lock.should_suppress(LockTarget::PlayClock, Some(NOW), NOW + 10));
        assert!(!lock.should_suppress(LockTarget::PlayClock, Some(NOW + 5), NOW + 10));
    }

    #[test]
    fn window_expires() {
        let lock = ActionLock::new(Duration::from_millis(500));
        lock.arm(LockTarget::MatchData, NOW);
        assert!(!lock.is_armed(LockTarget::MatchData, NOW + 500));
        assert!(!lock.should_suppress(LockTarget::MatchData, Some(NOW - 20), NOW + 500));
    }

    #[test]
    fn rearming_resets_window() {
        let lock = ActionLock::new(Duration::from_millis(500));
        lock.arm(LockTarget::GameClock, NOW);
        let fence = lock.arm(LockTarget::GameClock, NOW + 400);
        assert_eq!(fence.armed_until_ms, NOW + 900);
        assert!(lock.is_armed(LockTarget::GameClock, NOW + 800));
        // Stamped between the two commands: still stale.
        assert!(lock.should_suppress(LockTarget::GameClock, Some(NOW + 200), NOW + 800));
    }

    #[test]
    fn guard_serializes_check_and_arm() {
        let lock = Arc::new(ActionLock::new(Duration::from_millis(500)));
        let guard = lock.enter();
        assert!(!guard.should_suppress(LockTarget::GameClock, None, NOW));

        let (tx, rx) = mpsc::channel();
        let editor = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                lock.arm(LockTarget::GameClock, NOW);
                tx.send(()).unwrap();
            })
        };
        // The edit cannot arm while a check-then-write is in progress.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(guard);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        editor.join().unwrap();
        assert!(lock.should_suppress(LockTarget::GameClock, None, NOW + 1));
    }
}
