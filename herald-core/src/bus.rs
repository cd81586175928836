//! Fan-out, in-process publish–subscribe primitive.
//!
//! Each subscriber owns an independent bounded buffer; a full buffer drops
//! the event **for that subscriber only** so a slow consumer never stalls
//! the producer or its peers. This is explicit policy, not a bug — callers
//! that need lossless delivery must drain promptly.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-subscriber buffer capacity.
const DEFAULT_CAPACITY: usize = 256;

struct Slot<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

struct Shared<T> {
    subscribers: Mutex<Vec<Slot<T>>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicUsize,
}

/// A fan-out event bus parameterized over the event shape.
///
/// Cloning the bus is cheap and yields a handle to the same subscriber
/// registry, so producers and consumers can hold their own copies.
pub struct EventBus<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T: Clone> EventBus<T> {
    /// Create a bus whose subscriptions buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                capacity: capacity.max(1),
                dropped: AtomicUsize::new(0),
            }),
        }
    }

    /// Register a new subscription with its own bounded buffer.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.push(Slot { id, tx });
        debug!(total = subscribers.len(), "bus subscriber added");
        Subscription {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Deliver `event` to every currently-registered subscription.
    ///
    /// Never blocks and never fails to the caller: a full buffer drops the
    /// event for that subscription with a warning; closed subscriptions are
    /// pruned. A snapshot of senders is taken under the lock so concurrent
    /// subscribe/unsubscribe during emit is safe.
    pub fn emit(&self, event: T) {
        let senders: Vec<(u64, mpsc::Sender<T>)> = {
            let subscribers = self.shared.subscribers.lock();
            subscribers.iter().map(|s| (s.id, s.tx.clone())).collect()
        };

        let mut closed: Vec<u64> = Vec::new();
        for (id, tx) in &senders {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(subscriber = id, "subscriber buffer full — dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.shared.subscribers.lock();
            subscribers.retain(|s| !closed.contains(&s.id));
        }
    }

    /// Current registration count.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    /// Total events dropped across all subscriptions since creation.
    pub fn dropped_count(&self) -> usize {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// One subscriber's end of the bus: a FIFO of accepted events.
///
/// Dropping the subscription unregisters it; calling
/// [`Subscription::unsubscribe`] does the same eagerly and is idempotent.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    shared: Arc<Shared<T>>,
}

impl<T> Subscription<T> {
    /// Await the next event. Returns `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking read of the next buffered event.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Remove this subscription from the bus. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        let mut subscribers = self.shared.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != self.id);
        if subscribers.len() != before {
            debug!(remaining = subscribers.len(), "bus subscriber removed");
        }
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
