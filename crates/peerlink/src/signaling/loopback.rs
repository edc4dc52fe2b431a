//! In-process signaling over a [`SignalBus`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use signal_bus::{SignalBus, SignalEnvelope};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{SignalingChannel, SignalingSink};
use crate::error::{P2pError, P2pResult};
use crate::identity::RemoteId;

struct Session {
    identity: RemoteId,
    pump: JoinHandle<()>,
}

/// Signaling transport where the connect token becomes the local identity.
pub struct LoopbackSignaling {
    bus: Arc<dyn SignalBus>,
    sink: Arc<Mutex<Option<SignalingSink>>>,
    session: Mutex<Option<Session>>,
}

impl LoopbackSignaling {
    pub fn new(bus: Arc<dyn SignalBus>) -> Self {
        Self {
            bus,
            sink: Arc::new(Mutex::new(None)),
            session: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> Option<RemoteId> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.identity.clone())
    }

    fn spawn_pump(&self, identity: &RemoteId) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe(identity.as_str());
        let sink = Arc::clone(&self.sink);
        let identity = identity.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let current = sink.lock().clone();
                        match current {
                            Some(sink) => sink.message(envelope.from, envelope.payload),
                            None => warn!(identity = %identity, "no sink attached, dropping signal"),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(identity = %identity, skipped, "signaling mailbox lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for LoopbackSignaling {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.pump.abort();
        }
    }
}

#[async_trait]
impl SignalingChannel for LoopbackSignaling {
    fn attach(&self, sink: SignalingSink) {
        *self.sink.lock() = Some(sink);
    }

    async fn connect(&self, host: &str, token: &str) -> P2pResult<RemoteId> {
        if token.is_empty() {
            return Err(P2pError::Signaling("empty token".into()));
        }
        let identity = RemoteId::from(token);
        let mut session = self.session.lock();
        if let Some(existing) = session.as_ref() {
            if existing.identity == identity {
                return Ok(identity);
            }
            return Err(P2pError::InvalidState(format!(
                "already connected as {}",
                existing.identity
            )));
        }
        let pump = self.spawn_pump(&identity);
        info!(host, identity = %identity, "loopback signaling connected");
        *session = Some(Session {
            identity: identity.clone(),
            pump,
        });
        Ok(identity)
    }

    async fn disconnect(&self) -> P2pResult<()> {
        let Some(session) = self.session.lock().take() else {
            return Err(P2pError::InvalidState("signaling is not connected".into()));
        };
        session.pump.abort();
        info!(identity = %session.identity, "loopback signaling disconnected");
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.server_disconnected();
        }
        Ok(())
    }

    async fn send_message(&self, message: &str, remote_id: &RemoteId) -> P2pResult<()> {
        let from = self
            .identity()
            .ok_or_else(|| P2pError::InvalidState("signaling is not connected".into()))?;
        debug!(from = %from, to = %remote_id, "sending signal");
        self.bus.publish(SignalEnvelope {
            from: from.to_string(),
            to: remote_id.to_string(),
            payload: message.to_string(),
        })?;
        Ok(())
    }
}
