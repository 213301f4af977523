//! Lost-wakeup-safe readiness notification.
//!
//! [`ReadinessNotifier`] is a rendezvous point for tasks waiting for, or
//! announcing, the occurrence of an event. Unlike [`tokio::sync::Notify`],
//! waiters hand in their own channel, so they can wait with `select!` next to
//! other work, and every notification carries a sequence number.
//!
//! The sequence number is what makes it safe against lost wakeups: a waiter
//! registers with the last sequence it has seen, and if the notifier has
//! already moved past it the registration fires immediately instead of being
//! queued.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    waiters: Vec<mpsc::Sender<u64>>,
    sequence: u64,
}

/// Sequence-counting broadcast primitive.
#[derive(Debug, Default)]
pub struct ReadinessNotifier {
    inner: Mutex<Inner>,
}

impl ReadinessNotifier {
    /// Create a notifier that has never fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `waiter` to receive the sequence number of the next
    /// notification.
    ///
    /// `last_seen` is the sequence value the caller last observed (0 if it has
    /// never observed one). If the notifier has already advanced past it, the
    /// caller missed at least one notification and `waiter` is fired right
    /// away with the current sequence.
    ///
    /// Delivery never blocks, so `waiter` needs spare capacity for one value.
    /// Waiters whose receivers are gone are pruned here.
    pub fn register(&self, waiter: mpsc::Sender<u64>, last_seen: u64) {
        let mut inner = self.inner.lock();
        inner.waiters.retain(|w| !w.is_closed());

        if last_seen < inner.sequence {
            deliver(&waiter, inner.sequence);
            return;
        }
        inner.waiters.push(waiter);
    }

    /// Advance the sequence and fire every queued waiter once.
    ///
    /// Returns the new sequence number.
    pub fn notify(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.sequence += 1;

        let sequence = inner.sequence;
        for waiter in inner.waiters.drain(..) {
            deliver(&waiter, sequence);
        }
        sequence
    }

    /// Number of notifications so far.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().sequence
    }

    /// Number of waiters currently queued.
    pub fn pending_waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Wait until the sequence moves past `last_seen`.
    ///
    /// Returns the sequence value delivered, or `None` if the notifier was
    /// dropped while waiting.
    pub async fn wait_past(&self, last_seen: u64) -> Option<u64> {
        let (tx, mut rx) = mpsc::channel(1);
        self.register(tx, last_seen);
        rx.recv().await
    }
}

fn deliver(waiter: &mpsc::Sender<u64>, sequence: u64) {
    if let Err(e) = waiter.try_send(sequence) {
        // Full means the waiter ignored the capacity contract; closed means
        // it stopped listening. Neither may stall the notifier.
        debug!(sequence, error = %e, "Dropped readiness notification");
    }
}
