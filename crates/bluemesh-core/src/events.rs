//! Event bus for transport and messaging notifications
//!
//! A minimal publish/subscribe registry. Handlers for an event kind run
//! synchronously, in registration order, on the publishing execution
//! context. A panicking handler is logged and skipped so it cannot abort
//! delivery to the remaining subscribers.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::device::Device;
use crate::types::DeviceId;

// ----------------------------------------------------------------------------
// Event Kinds
// ----------------------------------------------------------------------------

/// Subscription key identifying one event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ScanStarted,
    DeviceDiscovered,
    ScanCompleted,
    DeviceConnected,
    ConnectionFailed,
    DeviceDisconnected,
    MessageSent,
    MessageReceived,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::ScanStarted => "scanStarted",
            EventKind::DeviceDiscovered => "deviceDiscovered",
            EventKind::ScanCompleted => "scanCompleted",
            EventKind::DeviceConnected => "deviceConnected",
            EventKind::ConnectionFailed => "connectionFailed",
            EventKind::DeviceDisconnected => "deviceDisconnected",
            EventKind::MessageSent => "messageSent",
            EventKind::MessageReceived => "messageReceived",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Notifications emitted by the transport simulator
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A scan pass began
    ScanStarted,
    /// A nearby device was synthesized during a scan
    DeviceDiscovered(Device),
    /// The scan pass finished (normally or by cancellation)
    ScanCompleted,
    /// A connection attempt succeeded
    DeviceConnected(Device),
    /// A connection attempt failed after its latency window
    ConnectionFailed(Device),
    /// The active connection was torn down
    DeviceDisconnected(Device),
    /// Outbound content was transmitted to the connected peer
    MessageSent { content: String, peer_id: DeviceId },
    /// Inbound content arrived from the connected peer
    MessageReceived { content: String, peer_id: DeviceId },
}

impl MeshEvent {
    /// The subscription key this event is delivered under
    pub fn kind(&self) -> EventKind {
        match self {
            MeshEvent::ScanStarted => EventKind::ScanStarted,
            MeshEvent::DeviceDiscovered(_) => EventKind::DeviceDiscovered,
            MeshEvent::ScanCompleted => EventKind::ScanCompleted,
            MeshEvent::DeviceConnected(_) => EventKind::DeviceConnected,
            MeshEvent::ConnectionFailed(_) => EventKind::ConnectionFailed,
            MeshEvent::DeviceDisconnected(_) => EventKind::DeviceDisconnected,
            MeshEvent::MessageSent { .. } => EventKind::MessageSent,
            MeshEvent::MessageReceived { .. } => EventKind::MessageReceived,
        }
    }
}

// ----------------------------------------------------------------------------
// Subscriptions
// ----------------------------------------------------------------------------

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&MeshEvent) + Send + Sync + 'static>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
}

// ----------------------------------------------------------------------------
// Event Bus
// ----------------------------------------------------------------------------

/// Publish/subscribe registry shared between the simulator and its callers
///
/// Cloning the bus yields another handle onto the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind
    ///
    /// Handlers are invoked in registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&MeshEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .subscribers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered handler
    ///
    /// Returns `false` when the subscription was not found (already removed,
    /// or registered under a different kind).
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        match registry.subscribers.get_mut(&kind) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(sub_id, _)| *sub_id != id);
                handlers.len() != before
            }
            None => false,
        }
    }

    /// Deliver an event to every handler registered for its kind
    ///
    /// Dispatch is synchronous and in registration order. The subscriber list
    /// is snapshotted first, so handlers may subscribe or unsubscribe during
    /// dispatch without affecting the current delivery.
    pub fn publish(&self, event: &MeshEvent) {
        let handlers: Vec<Handler> = {
            let registry = self.lock();
            registry
                .subscribers
                .get(&event.kind())
                .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = %event.kind(), "event handler panicked, continuing dispatch");
            }
        }
    }

    /// Number of handlers currently registered for a kind
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock()
            .subscribers
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        // A poisoned registry only means a handler panicked mid-dispatch;
        // the map itself is still usable.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let total: usize = registry.subscribers.values().map(Vec::len).sum();
        f.debug_struct("EventBus")
            .field("subscribers", &total)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
