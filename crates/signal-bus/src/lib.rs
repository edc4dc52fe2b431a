use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::broadcast;

const MAILBOX_CAPACITY: usize = 256;

/// One signaling message addressed from one identity to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    pub from: String,
    pub to: String,
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no listener registered for {0}")]
    Offline(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Routes signaling envelopes to per-identity mailboxes.
pub trait SignalBus: Send + Sync {
    fn subscribe(&self, identity: &str) -> broadcast::Receiver<SignalEnvelope>;
    fn publish(&self, envelope: SignalEnvelope) -> BusResult<()>;
    fn is_online(&self, identity: &str) -> bool;
}

/// In-process hub for tests and the demo peers.
#[derive(Debug, Default)]
pub struct LocalSignalBus {
    mailboxes: parking_lot::RwLock<HashMap<String, broadcast::Sender<SignalEnvelope>>>,
}

impl LocalSignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox_for(&self, identity: &str) -> broadcast::Sender<SignalEnvelope> {
        if let Some(sender) = self.mailboxes.read().get(identity) {
            return sender.clone();
        }
        let mut guard = self.mailboxes.write();
        guard
            .entry(identity.to_string())
            .or_insert_with(|| broadcast::channel(MAILBOX_CAPACITY).0)
            .clone()
    }

    /// Identities with at least one live subscriber, sorted.
    pub fn online(&self) -> Vec<String> {
        let guard = self.mailboxes.read();
        let mut ids: Vec<String> = guard
            .iter()
            .filter(|(_, sender)| sender.receiver_count() > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl SignalBus for LocalSignalBus {
    fn subscribe(&self, identity: &str) -> broadcast::Receiver<SignalEnvelope> {
        self.mailbox_for(identity).subscribe()
    }

    fn publish(&self, envelope: SignalEnvelope) -> BusResult<()> {
        let sender = self.mailbox_for(&envelope.to);
        let to = envelope.to.clone();
        sender.send(envelope).map(|_| ()).map_err(|_| {
            tracing::debug!(to = %to, "signal envelope dropped, mailbox has no listener");
            BusError::Offline(to)
        })
    }

    fn is_online(&self, identity: &str) -> bool {
        self.mailboxes
            .read()
            .get(identity)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }
}
