// src/core/events.rs

//! Defines the events delivered to the embedding application and the
//! dispatcher that fans them out to registered listeners.
//!
//! Producers (receive loops, send tasks, the engine facade) never wait on a
//! listener: they push onto an unbounded channel and a single dispatcher task
//! invokes the listeners. Because every producer for a given connection goes
//! through the same channel, events for one connection are delivered in the
//! order they were produced.

use crate::core::metrics;
use bytes::Bytes;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

/// Bytes that arrived on a connected connection. One event per read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent {
    pub connection_id: u64,
    pub data: Bytes,
}

impl DataEvent {
    /// The payload decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// A connection changed state. `connected` is the state after the transition
/// and `data` is a short description of why it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub connection_id: u64,
    pub connected: bool,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Data(DataEvent),
    State(StateEvent),
}

impl Event {
    pub fn connection_id(&self) -> u64 {
        match self {
            Event::Data(e) => e.connection_id,
            Event::State(e) => e.connection_id,
        }
    }
}

/// Receives engine events. Both callbacks run on the dispatcher task, so a slow
/// listener delays later events but never blocks the engine.
pub trait EventListener: Send + Sync + 'static {
    fn on_data(&self, _event: &DataEvent) {}
    fn on_connect_state_change(&self, _event: &StateEvent) {}
}

/// A cloneable producer handle. Sending never blocks and never fails loudly:
/// once the dispatcher is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<Event>,
}

impl EventSink {
    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("Dispatcher has stopped; dropping event.");
        }
    }

    pub fn data(&self, connection_id: u64, data: Bytes) {
        self.emit(Event::Data(DataEvent {
            connection_id,
            data,
        }));
    }

    pub fn state(&self, connection_id: u64, connected: bool, data: impl Into<String>) {
        self.emit(Event::State(StateEvent {
            connection_id,
            connected,
            data: data.into(),
        }));
    }
}

type ListenerList = RwLock<Vec<(u64, Arc<dyn EventListener>)>>;

/// Owns the listener list and the task that delivers events to it.
pub struct ReceiveDispatcher {
    sink: EventSink,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
}

impl ReceiveDispatcher {
    /// Creates the dispatcher and spawns its delivery task on the current Tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners: Arc<ListenerList> = Arc::new(RwLock::new(Vec::new()));
        tokio::spawn(run_dispatch_loop(rx, listeners.clone()));
        Self {
            sink: EventSink { tx },
            listeners,
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Registers a listener. It stays registered until the returned handle is
    /// used to remove it or the dispatcher is dropped.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Registers a listener that forwards every event into a channel.
    pub fn subscribe(&self) -> (UnboundedReceiver<Event>, ListenerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.add_listener(Arc::new(ChannelListener { tx }));
        (rx, handle)
    }

    /// Unregisters every listener.
    pub fn remove_all_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for ReceiveDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by `add_listener`; removes the listener when `remove` is called.
/// Dropping the handle keeps the listener registered.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl ListenerHandle {
    pub fn remove(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

struct ChannelListener {
    tx: UnboundedSender<Event>,
}

impl EventListener for ChannelListener {
    fn on_data(&self, event: &DataEvent) {
        let _ = self.tx.send(Event::Data(event.clone()));
    }

    fn on_connect_state_change(&self, event: &StateEvent) {
        let _ = self.tx.send(Event::State(event.clone()));
    }
}

async fn run_dispatch_loop(mut rx: UnboundedReceiver<Event>, listeners: Arc<ListenerList>) {
    debug!("Event dispatcher started.");
    while let Some(event) = rx.recv().await {
        // Clone the list so listeners may add or remove listeners from a callback.
        let snapshot: Vec<_> = listeners.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            let delivered = catch_unwind(AssertUnwindSafe(|| match &event {
                Event::Data(e) => listener.on_data(e),
                Event::State(e) => listener.on_connect_state_change(e),
            }));
            if delivered.is_err() {
                error!(
                    "An event listener panicked while handling an event for connection {}.",
                    event.connection_id()
                );
            }
        }
        metrics::EVENTS_DISPATCHED_TOTAL.inc();
    }
    debug!("Event dispatcher stopped.");
}
