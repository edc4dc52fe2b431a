//! Signaling transport seam.

pub mod loopback;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::P2pResult;
use crate::identity::RemoteId;

/// Transport that carries opaque signaling text between identities.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Route inbound traffic to `sink`. Called once by the client it belongs to.
    fn attach(&self, sink: SignalingSink);

    /// Resolves to the identity the server assigned to this client.
    async fn connect(&self, host: &str, token: &str) -> P2pResult<RemoteId>;

    async fn disconnect(&self) -> P2pResult<()>;

    async fn send_message(&self, message: &str, remote_id: &RemoteId) -> P2pResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Message { from: RemoteId, text: String },
    ServerDisconnected,
}

/// Inbound half handed to a transport. Events are processed in the order they
/// are posted.
#[derive(Debug, Clone)]
pub struct SignalingSink {
    tx: mpsc::UnboundedSender<SignalingEvent>,
}

impl SignalingSink {
    pub fn new(tx: mpsc::UnboundedSender<SignalingEvent>) -> Self {
        Self { tx }
    }

    pub fn message(&self, from: impl Into<RemoteId>, text: impl Into<String>) {
        self.post(SignalingEvent::Message {
            from: from.into(),
            text: text.into(),
        });
    }

    pub fn server_disconnected(&self) {
        self.post(SignalingEvent::ServerDisconnected);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn post(&self, event: SignalingEvent) {
        if self.tx.send(event).is_err() {
            trace!("client gone, dropping signaling event");
        }
    }
}
