//! Listener traits and the snapshot-on-delivery listener set

use std::sync::Arc;

use kura_core::Envelope;
use parking_lot::RwLock;

/// Properties of a delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    /// Device the message was addressed to
    pub device_id: String,
    pub app_id: String,
    /// App topic the message arrived on (after the app id)
    pub app_topic: String,
    pub qos: u8,
    pub retain: bool,
}

/// Receives messages arriving on a subscriber's topic
pub trait SubscriberListener: Send + Sync {
    fn on_message_arrived(&self, properties: &MessageProperties, envelope: &Envelope);
}

/// Receives connection-state changes
pub trait ConnectionListener: Send + Sync {
    fn on_connection_established(&self) {}

    fn on_connection_lost(&self, _cause: &str) {}

    fn on_disconnected(&self) {}
}

/// Ordered set of listeners, identified by pointer.
///
/// Delivery iterates a [`snapshot`](Self::snapshot) so callbacks may
/// register or unregister listeners without deadlocking; a listener
/// unregistered before a snapshot is taken never appears in it.
pub struct ListenerSet<L: ?Sized> {
    listeners: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Add a listener; returns false if it was already registered
    pub fn register(&self, listener: Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unregister(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.listeners
            .read()
            .iter()
            .any(|l| same_listener(l, listener))
    }

    /// Listeners in registration order at this instant
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.read().clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

// Compare data pointers only; vtable pointers for the same object may differ.
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
