//! A single observable parameter

use crate::key::ControlKey;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Context a write was issued from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// UI, MIDI or any other control-plane caller
    Control,
    /// The audio-processing context
    Engine,
    /// The sync engine itself. Subscribers use this to ignore their own writes.
    Sync,
}

/// Change notification posted to subscribers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlEvent {
    pub key: ControlKey,
    pub value: f64,
    pub origin: Origin,
}

impl ControlEvent {
    /// Value interpreted as a boolean flag
    pub fn is_on(&self) -> bool {
        self.value != 0.0
    }
}

struct Subscriber {
    id: u64,
    tx: Sender<ControlEvent>,
}

/// Thread-visible `f64` cell with change notification
///
/// The value is stored as raw bits in an `AtomicU64`, so reads and writes
/// never block. Notification is a `try_send` into each subscriber's
/// bounded inbox: nothing runs on the writer's stack apart from the send.
pub struct Control {
    key: ControlKey,
    value: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
}

impl Control {
    pub fn new(key: ControlKey, initial: f64) -> Self {
        Self {
            key,
            value: AtomicU64::new(initial.to_bits()),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> ControlKey {
        self.key
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Acquire))
    }

    /// Value interpreted as a boolean flag (non-zero = on)
    pub fn is_on(&self) -> bool {
        self.get() != 0.0
    }

    /// Store a new value and notify subscribers
    ///
    /// Writing the value the control already holds is a no-op and posts
    /// nothing. Returns whether the value changed.
    pub fn set(&self, value: f64, origin: Origin) -> bool {
        let previous = f64::from_bits(self.value.swap(value.to_bits(), Ordering::AcqRel));
        if previous == value {
            return false;
        }

        let event = ControlEvent {
            key: self.key,
            value,
            origin,
        };
        for subscriber in self.subscribers.read().iter() {
            if let Err(TrySendError::Full(_)) = subscriber.tx.try_send(event) {
                warn!(key = %self.key, "subscriber inbox full, dropping control event");
            }
        }
        true
    }

    /// Store a boolean flag as 1.0 / 0.0
    pub fn set_on(&self, on: bool, origin: Origin) -> bool {
        self.set(if on { 1.0 } else { 0.0 }, origin)
    }

    /// Post future changes of this control into `tx`
    ///
    /// The subscription lasts until the returned guard is dropped.
    pub fn subscribe(self: &Arc<Self>, tx: Sender<ControlEvent>) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber { id, tx });
        Subscription {
            control: Arc::clone(self),
            id,
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("key", &self.key)
            .field("value", &self.get())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Guard for a control subscription; unsubscribes on drop
pub struct Subscription {
    control: Arc<Control>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.control.unsubscribe(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.control.key())
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Item;
    use crossbeam_channel::bounded;

    fn rate_control() -> Arc<Control> {
        Arc::new(Control::new(ControlKey::master(Item::SyncBpm), 124.0))
    }

    #[test]
    fn test_get_set() {
        let control = rate_control();
        assert_eq!(control.get(), 124.0);
        assert!(control.set(128.0, Origin::Control));
        assert_eq!(control.get(), 128.0);
    }

    #[test]
    fn test_unchanged_write_is_silent() {
        let control = rate_control();
        let (tx, rx) = bounded(8);
        let _sub = control.subscribe(tx);

        assert!(!control.set(124.0, Origin::Control));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_carries_key_and_origin() {
        let control = rate_control();
        let (tx, rx) = bounded(8);
        let _sub = control.subscribe(tx);

        control.set(130.0, Origin::Engine);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.value, 130.0);
        assert_eq!(event.origin, Origin::Engine);
        assert_eq!(event.key, ControlKey::master(Item::SyncBpm));
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let control = rate_control();
        let (tx, rx) = bounded(8);
        let sub = control.subscribe(tx);
        assert_eq!(control.subscriber_count(), 1);

        drop(sub);
        assert_eq!(control.subscriber_count(), 0);
        control.set(90.0, Origin::Control);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_multiple_subscribers() {
        let control = rate_control();
        let (tx_a, rx_a) = bounded(8);
        let (tx_b, rx_b) = bounded(8);
        let _a = control.subscribe(tx_a);
        let _b = control.subscribe(tx_b);

        control.set_on(true, Origin::Control);
        assert!(rx_a.try_recv().unwrap().is_on());
        assert!(rx_b.try_recv().unwrap().is_on());
    }

    #[test]
    fn test_full_inbox_does_not_block() {
        let control = rate_control();
        let (tx, rx) = bounded(1);
        let _sub = control.subscribe(tx);

        control.set(1.0, Origin::Engine);
        control.set(2.0, Origin::Engine);
        assert_eq!(control.get(), 2.0);
        assert_eq!(rx.try_recv().unwrap().value, 1.0);
        assert!(rx.try_recv().is_err());
    }
}
