use std::sync::Arc;

use parking_lot::RwLock;

use crate::identity::RemoteId;
use crate::stream::RemoteStream;

/// Receives client events. All methods run on the client's event task, one
/// event at a time, in the order the events were produced.
pub trait P2pClientObserver: Send + Sync {
    fn on_server_disconnected(&self) {}

    fn on_message_received(&self, _remote_id: &RemoteId, _message: &str) {}

    fn on_stream_added(&self, _stream: &RemoteStream) {}

    /// Only delivered when the `peer-closed-events` feature is enabled.
    fn on_peer_connection_closed(&self, _remote_id: &RemoteId) {}
}

/// Work items for the event task.
#[derive(Debug, Clone)]
pub(crate) enum ClientEvent {
    ServerDisconnected,
    MessageReceived { remote_id: RemoteId, message: String },
    StreamAdded(RemoteStream),
    ChannelStopped { remote_id: RemoteId, serial: u64 },
    PeerAbandoned { remote_id: RemoteId },
}

#[derive(Default)]
pub(crate) struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn P2pClientObserver>>>,
}

fn same_observer(a: &Arc<dyn P2pClientObserver>, b: &Arc<dyn P2pClientObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the observer was already registered.
    pub fn add(&self, observer: Arc<dyn P2pClientObserver>) -> bool {
        let mut observers = self.observers.write();
        if observers.iter().any(|existing| same_observer(existing, &observer)) {
            return false;
        }
        observers.push(observer);
        true
    }

    pub fn remove(&self, observer: &Arc<dyn P2pClientObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|existing| !same_observer(existing, observer));
        observers.len() != before
    }

    /// Copy of the current list, so observers may register or unregister
    /// while being notified.
    pub fn snapshot(&self) -> Vec<Arc<dyn P2pClientObserver>> {
        self.observers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }
}
