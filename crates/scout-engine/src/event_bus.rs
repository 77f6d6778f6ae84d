//! Per-session event queues.
//!
//! Each session owns one unbounded FIFO. Producers publish into it, a single
//! subscriber drains it up to and including the `DONE` sentinel, and the
//! subscriber that consumes `DONE` removes the queue from the registry.
//! Several subscribers on one session split the events between them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use scout_core::events::{EventType, OrchestrationEvent};
use scout_core::ids::SessionId;

/// A closed queue older than this is not handed to a new subscriber; the
/// subscriber gets a fresh queue and waits for the next run instead.
pub const LATE_SUBSCRIBER_GRACE: Duration = Duration::from_secs(5);

/// Registry of live session queues.
#[derive(Default)]
pub struct EventBus {
    sessions: DashMap<SessionId, Arc<SessionQueue>>,
}

struct SessionQueue {
    tx: mpsc::UnboundedSender<OrchestrationEvent>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OrchestrationEvent>>,
    state: Mutex<QueueState>,
}

struct QueueState {
    last_timestamp: Option<DateTime<Utc>>,
    touched_at: Instant,
    closed_at: Option<Instant>,
    /// Set once a producer has opened the queue.
    has_producer: bool,
    subscribers: usize,
}

impl SessionQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            state: Mutex::new(QueueState {
                last_timestamp: None,
                touched_at: Instant::now(),
                closed_at: None,
                has_producer: false,
                subscribers: 0,
            }),
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed_at.is_some()
    }

    fn closed_longer_than(&self, age: Duration) -> bool {
        matches!(self.state.lock().closed_at, Some(at) if at.elapsed() >= age)
    }

    /// Closed and undrained past `ttl`, or opened only by subscribers that
    /// have all gone and left it idle past `ttl`.
    fn is_stale(&self, ttl: Duration) -> bool {
        let state = self.state.lock();
        match state.closed_at {
            Some(at) => at.elapsed() >= ttl,
            None => {
                !state.has_producer && state.subscribers == 0 && state.touched_at.elapsed() >= ttl
            }
        }
    }

    fn attach_producer(&self) {
        let mut state = self.state.lock();
        state.has_producer = true;
        state.touched_at = Instant::now();
    }

    fn attach_subscriber(&self) {
        let mut state = self.state.lock();
        state.subscribers += 1;
        state.touched_at = Instant::now();
    }

    fn detach_subscriber(&self) {
        let mut state = self.state.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        state.touched_at = Instant::now();
    }

    /// Stamp and enqueue under the state lock so timestamps follow queue order.
    fn enqueue(
        &self,
        close: bool,
        make: impl FnOnce(DateTime<Utc>) -> OrchestrationEvent,
    ) -> bool {
        let mut state = self.state.lock();
        if state.closed_at.is_some() {
            return false;
        }
        let now = Utc::now();
        let timestamp = match state.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        state.last_timestamp = Some(timestamp);
        state.touched_at = Instant::now();
        if close {
            state.closed_at = Some(state.touched_at);
        }
        self.tx.send(make(timestamp)).is_ok()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a queue for `id` if none exists. An existing open queue is
    /// kept; a closed one left behind by an earlier run is replaced.
    pub fn create_session(&self, id: &SessionId) {
        self.queue_for_producer(id);
    }

    fn queue_for_producer(&self, id: &SessionId) -> Arc<SessionQueue> {
        let mut entry = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(SessionQueue::new()));
        if entry.is_closed() {
            debug!(session_id = %id, "replacing closed session queue");
            *entry = Arc::new(SessionQueue::new());
        }
        entry.attach_producer();
        Arc::clone(entry.value())
    }

    fn queue_for_subscriber(&self, id: &SessionId) -> Arc<SessionQueue> {
        let mut entry = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(SessionQueue::new()));
        if entry.closed_longer_than(LATE_SUBSCRIBER_GRACE) {
            debug!(session_id = %id, "discarding stale closed queue for new subscriber");
            *entry = Arc::new(SessionQueue::new());
        }
        entry.attach_subscriber();
        Arc::clone(entry.value())
    }

    fn queue(&self, id: &SessionId) -> Option<Arc<SessionQueue>> {
        self.sessions.get(id).map(|q| Arc::clone(q.value()))
    }

    /// Append an event. Dropped when the session has no queue or is closed.
    pub fn publish(&self, id: &SessionId, event_type: EventType, payload: Value) -> bool {
        let Some(queue) = self.queue(id) else {
            debug!(session_id = %id, event_type = %event_type, "no queue for session, dropping event");
            return false;
        };
        let published =
            queue.enqueue(false, |ts| OrchestrationEvent::new(event_type, payload, ts));
        if !published {
            debug!(session_id = %id, event_type = %event_type, "session closed, dropping event");
        }
        published
    }

    /// Enqueue `DONE` and mark the session closed. The queue stays in the
    /// registry until a subscriber drains it, it is removed, or it is swept.
    /// Returns `false` when there was nothing open to close.
    pub fn close_session(&self, id: &SessionId) -> bool {
        match self.queue(id) {
            Some(queue) => queue.enqueue(true, OrchestrationEvent::done),
            None => false,
        }
    }

    /// Create the session and return a guard that closes it when dropped.
    pub fn open_session(self: &Arc<Self>, id: &SessionId) -> SessionGuard {
        self.create_session(id);
        SessionGuard {
            bus: Arc::clone(self),
            session_id: id.clone(),
            closed: false,
        }
    }

    /// Lazily drain the session's queue.
    ///
    /// Creates the queue when absent, so a subscriber that attaches before
    /// the producer still sees every later event. A queue closed more than
    /// [`LATE_SUBSCRIBER_GRACE`] ago is replaced rather than replayed. The
    /// stream ends after yielding `DONE`.
    pub fn subscribe(
        self: &Arc<Self>,
        id: &SessionId,
    ) -> impl Stream<Item = OrchestrationEvent> + Send + 'static {
        let queue = self.queue_for_subscriber(id);
        let state = Subscription {
            bus: Arc::clone(self),
            session_id: id.clone(),
            queue,
        };

        stream::unfold(Some(state), |state| async move {
            let Some(sub) = state else {
                return None;
            };
            let event = {
                let mut rx = sub.queue.rx.lock().await;
                let Some(event) = rx.recv().await else {
                    return None;
                };
                if event.is_terminal() {
                    // Other readers of this queue end once it is empty.
                    rx.close();
                }
                event
            };
            if event.is_terminal() {
                sub.bus.remove_if_same(&sub.session_id, &sub.queue);
                Some((event, None))
            } else {
                Some((event, Some(sub)))
            }
        })
    }

    fn remove_if_same(&self, id: &SessionId, queue: &Arc<SessionQueue>) {
        let removed = self
            .sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, queue))
            .is_some();
        if removed {
            debug!(session_id = %id, "session drained and removed");
        }
    }

    /// Drop the session's queue unconditionally.
    pub fn remove_session(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Remove queues closed more than `ttl` ago and never drained, along
    /// with queues only subscribers ever opened once the last one has been
    /// gone for `ttl`.
    pub fn sweep_closed(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, queue| !queue.is_stale(ttl));
        let swept = before.saturating_sub(self.sessions.len());
        if swept > 0 {
            debug!(swept, "swept stale session queues");
        }
        swept
    }

    pub fn has_session(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_closed(&self, id: &SessionId) -> bool {
        self.queue(id).is_some_and(|q| q.is_closed())
    }
}

struct Subscription {
    bus: Arc<EventBus>,
    session_id: SessionId,
    queue: Arc<SessionQueue>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.detach_subscriber();
    }
}

/// Closes its session exactly once, on [`SessionGuard::close`] or drop.
pub struct SessionGuard {
    bus: Arc<EventBus>,
    session_id: SessionId,
    closed: bool,
}

impl SessionGuard {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.closed {
            self.closed = true;
            self.bus.close_session(&self.session_id);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.finish();
    }
}
