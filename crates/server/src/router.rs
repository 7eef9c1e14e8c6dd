//! Wire-level event fan-out to websocket subscribers.
//!
//! Each published event is serialized exactly once; every connection whose
//! class set accepts it receives the shared JSON string over its own bounded
//! queue. A connection whose queue is full or closed is unregistered;
//! failed sends never block or reorder delivery to other subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use scrive_events::{serialize_event, Event, EventClass};
use tokio::sync::mpsc;

/// Outbound queue depth per connection (~a few seconds of non-chunk
/// traffic; chunk subscribers need to keep up).
const CONNECTION_QUEUE: usize = 256;

struct Connection {
    classes: HashSet<EventClass>,
    tx: mpsc::Sender<Arc<str>>,
}

pub struct EventRouter {
    connections: Mutex<HashMap<u64, Connection>>,
    next_id: AtomicU64,
    author_uri: String,
}

impl EventRouter {
    pub fn new(author_uri: impl Into<String>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            author_uri: author_uri.into(),
        }
    }

    /// Register a subscriber; returns its id and the queue to drain into
    /// the websocket.
    pub fn register(&self, classes: HashSet<EventClass>) -> (u64, mpsc::Receiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE);
        self.connections
            .lock()
            .expect("event router mutex poisoned")
            .insert(id, Connection { classes, tx });
        tracing::info!(id, total = self.client_count(), "event client registered");
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        let removed = self
            .connections
            .lock()
            .expect("event router mutex poisoned")
            .remove(&id)
            .is_some();
        if removed {
            tracing::info!(id, remaining = self.client_count(), "event client unregistered");
        }
    }

    pub fn client_count(&self) -> usize {
        self.connections
            .lock()
            .expect("event router mutex poisoned")
            .len()
    }

    /// Serialize once and fan out to all accepting connections.
    pub fn publish(&self, event: &Event) {
        let class = event.class();
        let mut dead = Vec::new();
        {
            let connections = self.connections.lock().expect("event router mutex poisoned");
            if connections.is_empty() {
                return;
            }
            let mut payload: Option<Arc<str>> = None;
            for (id, connection) in connections.iter() {
                if !connection.classes.contains(&class) {
                    continue;
                }
                let json = payload.get_or_insert_with(|| {
                    Arc::from(serialize_event(event, &self.author_uri).to_string())
                });
                if connection.tx.try_send(Arc::clone(json)).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            tracing::warn!(id, "dropping event client after failed send");
            self.unregister(id);
        }
    }
}
