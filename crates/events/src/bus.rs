//! Typed in-process event fan-out.
//!
//! Pipeline stages publish once; every registered subscriber whose class set
//! accepts the event receives a shared reference over its own bounded
//! channel. A subscriber that cannot keep up (full queue) or has gone away
//! (closed queue) is unregistered; nothing ever blocks the publisher.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::{Event, EventClass};

/// Handle identifying a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    classes: HashSet<EventClass>,
    tx: mpsc::Sender<Arc<Event>>,
}

/// In-process fan-out bus with per-subscriber class filters.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for the given classes.
    ///
    /// Returns the subscriber handle and the receiving end of its queue.
    /// `capacity` bounds how far the subscriber may fall behind before it is
    /// dropped on the next publish.
    pub fn register(
        &self,
        classes: HashSet<EventClass>,
        capacity: usize,
    ) -> (SubscriberId, mpsc::Receiver<Arc<Event>>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers
            .lock()
            .expect("event bus mutex poisoned")
            .push(Subscriber { id, classes, tx });
        (id, rx)
    }

    pub fn unregister(&self, id: SubscriberId) {
        self.subscribers
            .lock()
            .expect("event bus mutex poisoned")
            .retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event bus mutex poisoned")
            .len()
    }

    /// Publish an event to every subscriber accepting its class.
    ///
    /// Per-subscriber order follows publish order (FIFO queues). A failed
    /// send removes the subscriber and never disturbs the others.
    pub fn publish(&self, event: Event) {
        self.publish_shared(Arc::new(event));
    }

    pub fn publish_shared(&self, event: Arc<Event>) {
        let class = event.class();
        let mut dead: Vec<SubscriberId> = Vec::new();
        {
            let subscribers = self.subscribers.lock().expect("event bus mutex poisoned");
            for sub in subscribers.iter() {
                if !sub.classes.contains(&class) {
                    continue;
                }
                if let Err(err) = sub.tx.try_send(Arc::clone(&event)) {
                    match err {
                        mpsc::error::TrySendError::Full(_) => {
                            tracing::warn!(subscriber = sub.id.0, class = %class, "subscriber queue full, dropping subscriber");
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            tracing::debug!(subscriber = sub.id.0, "subscriber gone");
                        }
                    }
                    dead.push(sub.id);
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock().expect("event bus mutex poisoned");
            subscribers.retain(|s| !dead.contains(&s.id));
        }
    }
}
