//! Event Listener Adapters
//!
//! Implementations of the `StorageEventListener` port plus the registry the
//! store uses to fan events out to them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::events::StorageEvent;
use crate::domain::ports::StorageEventListener;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener registry.
///
/// `emit` calls every registered listener synchronously, in registration
/// order. The listener list is cloned before dispatch so a listener may
/// subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn StorageEventListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: Arc<dyn StorageEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Deliver an event to every listener.
    pub fn emit(&self, event: StorageEvent) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Check if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_count", &self.len())
            .finish()
    }
}

/// Logging-based event listener.
///
/// Writes every event to the tracing system as JSON. Errors always go out
/// at warn level.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventListener {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingEventListener {
    /// Create a new logging listener (debug level).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a listener that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    /// Create a listener that logs at debug level.
    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

impl StorageEventListener for LoggingEventListener {
    fn on_event(&self, event: &StorageEvent) {
        let event_type = event.event_type();
        let json = serde_json::to_string(event).unwrap_or_else(|_| format!("{:?}", event));

        if matches!(event, StorageEvent::StorageError { .. }) {
            warn!(event_type = %event_type, event = %json, "Storage event");
        } else if self.info_level {
            info!(event_type = %event_type, event = %json, "Storage event");
        } else {
            debug!(event_type = %event_type, event = %json, "Storage event");
        }
    }
}

/// In-memory event collector for testing.
///
/// Collects events in memory for later inspection during tests.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<StorageEvent>>,
}

impl InMemoryEventCollector {
    /// Create a new in-memory event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<StorageEvent> {
        self.events.read().clone()
    }

    /// Get the count of collected events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if there are no events.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<StorageEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Count events of a specific type.
    pub fn count_of_type(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl StorageEventListener for InMemoryEventCollector {
    fn on_event(&self, event: &StorageEvent) {
        self.events.write().push(event.clone());
    }
}

/// Forwards events into an unbounded tokio channel for async consumers.
///
/// Sending never blocks the emitting call; once the receiver is gone
/// events are dropped.
#[derive(Debug, Clone)]
pub struct ChannelEventListener {
    tx: mpsc::UnboundedSender<StorageEvent>,
}

impl ChannelEventListener {
    /// Create a listener and the receiving half of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StorageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StorageEventListener for ChannelEventListener {
    fn on_event(&self, event: &StorageEvent) {
        let _ = self.tx.send(event.clone());
    }
}
