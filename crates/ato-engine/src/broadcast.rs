//! Per-session event fan-out
//!
//! Each session can have multiple stream subscribers (e.g. multiple browser
//! tabs on an SSE endpoint). Delivery is non-blocking: a stalled subscriber
//! gets events dropped with a warning rather than back-pressuring the
//! producers.

use crate::events::{EventKind, SessionEvent};
use ato_core::schema::now_iso;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bounded queue depth per subscriber.
pub const QUEUE_CAPACITY: usize = 256;

/// Silence interval after which a keepalive comment is emitted.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// session_id -> subscriber_id -> queue. Shared with the streams so a
/// dropped stream can deregister itself.
type SubscriberMap = Arc<Mutex<HashMap<String, HashMap<u64, mpsc::Sender<SessionEvent>>>>>;

fn remove_subscriber(map: &SubscriberMap, session_id: &str, id: u64) {
    let mut subs = map.lock().expect("subscriber map poisoned");
    if let Some(queues) = subs.get_mut(session_id) {
        queues.remove(&id);
        if queues.is_empty() {
            subs.remove(session_id);
        }
    }
}

/// Manages event queues per session.
pub struct EventBroadcaster {
    subscribers: SubscriberMap,
    next_id: AtomicU64,
    keepalive: Duration,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_keepalive(KEEPALIVE_INTERVAL)
    }

    /// Tests shorten the keepalive so they do not wait 30 s.
    pub fn with_keepalive(keepalive: Duration) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            keepalive,
        }
    }

    /// Create a new subscriber stream for a session.
    pub fn subscribe(&self, session_id: &str) -> EventStream {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subs = self.subscribers.lock().expect("subscriber map poisoned");
            subs.entry(session_id.to_string()).or_default().insert(id, tx);
        }
        debug!(session = session_id, subscriber = id, "stream subscribed");
        EventStream {
            session_id: session_id.to_string(),
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
            keepalive: self.keepalive,
            finished: false,
        }
    }

    /// Offer an event to every subscriber of a session without blocking.
    ///
    /// Full queues drop the event; closed queues are pruned.
    pub fn broadcast(&self, session_id: &str, event: SessionEvent) {
        let snapshot: Vec<(u64, mpsc::Sender<SessionEvent>)> = {
            let subs = self.subscribers.lock().expect("subscriber map poisoned");
            match subs.get(session_id) {
                Some(queues) => queues.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return,
            }
        };

        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session = session_id, subscriber = id, "event queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    remove_subscriber(&self.subscribers, session_id, id);
                }
            }
        }
    }

    /// Drop all subscribers for a session. Their streams end on next poll.
    pub fn cleanup(&self, session_id: &str) {
        self.subscribers
            .lock()
            .expect("subscriber map poisoned")
            .remove(session_id);
    }

    #[cfg(test)]
    fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(session_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

/// One subscriber's view of a session's event stream.
///
/// Deregisters itself on drop.
pub struct EventStream {
    session_id: String,
    id: u64,
    rx: mpsc::Receiver<SessionEvent>,
    subscribers: SubscriberMap,
    keepalive: Duration,
    finished: bool,
}

impl EventStream {
    /// Next raw event, without keepalive framing. `None` once the stream
    /// has delivered `session_end` or the session was cleaned up.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => {
                if event.kind == EventKind::SessionEnd {
                    self.finished = true;
                }
                Some(event)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Next SSE-framed chunk: `data: <json>\n\n` for events, or a
    /// keepalive comment `: keepalive <ts>\n\n` after a silence interval.
    ///
    /// Returns `None` once the `session_end` event has been delivered or
    /// the session was cleaned up.
    pub async fn next_chunk(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        match tokio::time::timeout(self.keepalive, self.rx.recv()).await {
            Ok(Some(event)) => {
                if event.kind == EventKind::SessionEnd {
                    self.finished = true;
                }
                // SessionEvent serialization cannot fail: plain fields + Value.
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some(format!("data: {json}\n\n"))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(_) => Some(format!(": keepalive {}\n\n", now_iso())),
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        remove_subscriber(&self.subscribers, &self.session_id, self.id);
    }
}
