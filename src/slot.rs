//! Named observable slots.
//!
//! A [`Slot`] holds one value that readers can fetch at any time or subscribe
//! to for change notifications. Writes that leave the value unchanged do not
//! wake subscribers, which is what makes re-applying the same partial update
//! invisible to consumers.

use tokio::sync::watch;

/// A named, observable value.
///
/// Backed by a [`watch`] channel: subscribers see the latest value, never a
/// backlog.
#[derive(Debug)]
pub struct Slot<T> {
    name: &'static str,
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Slot<T> {
    /// Create a slot holding `initial`.
    pub fn new(name: &'static str, initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { name, tx }
    }

    /// The slot's name, used in log output.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Clone out the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Read the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Replace the value. Returns `true` if it changed.
    pub fn set(&self, value: T) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            tracing::trace!(slot = self.name, "slot updated");
        }
        changed
    }

    /// Mutate the value in place. `f` returns whether it changed anything.
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    /// Subscribe to changes. The receiver starts with the current value marked
    /// as seen.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_notifies_only_on_change() {
        let slot = Slot::new("score", 0_u32);
        let mut rx = slot.subscribe();

        assert!(!slot.set(0));
        assert!(!rx.has_changed().unwrap());

        assert!(slot.set(7));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 7);
        assert_eq!(slot.get(), 7);
    }

    #[test]
    fn update_in_place() {
        let slot = Slot::new("events", vec![1, 2]);
        assert!(slot.update(|v| {
            v.push(3);
            true
        }));
        assert_eq!(slot.with(Vec::len), 3);
        assert_eq!(slot.name(), "events");
    }
}
