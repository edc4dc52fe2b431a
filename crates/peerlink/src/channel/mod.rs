//! Per-remote connection channel seam.
//!
//! The orchestrator never negotiates media itself. It owns one
//! [`PeerChannel`] per remote, built by a [`ChannelFactory`], and talks to it
//! through non-blocking submit calls that each carry a [`Completion`].

pub mod loopback;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::config::ChannelConfig;
use crate::error::{P2pError, P2pResult};
use crate::identity::RemoteId;
use crate::observer::ClientEvent;
use crate::signaling::SignalingChannel;
use crate::stats::{ConnectionStats, RtcStatsReport};
use crate::stream::{LocalStream, RemoteStream};

/// Single-use continuation for a channel operation.
///
/// Consuming `self` on every resolution path means a completion resolves at
/// most once. Dropping it unresolved surfaces as [`P2pError::Dropped`] on the
/// paired [`Outcome`].
#[must_use = "a completion must be resolved or handed on"]
pub struct Completion<T> {
    tx: Option<oneshot::Sender<P2pResult<T>>>,
}

impl<T> Completion<T> {
    pub fn pair() -> (Self, Outcome<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, Outcome { rx })
    }

    /// A completion nobody is waiting on.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_none()
    }

    pub fn complete(self, result: P2pResult<T>) {
        if let Some(tx) = self.tx {
            if tx.send(result).is_err() {
                trace!("completion receiver already gone");
            }
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, err: P2pError) {
        self.complete(Err(err));
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// Receiving half of a [`Completion`].
#[derive(Debug)]
pub struct Outcome<T> {
    rx: oneshot::Receiver<P2pResult<T>>,
}

impl<T> Future for Outcome<T> {
    type Output = P2pResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(P2pError::Dropped)))
    }
}

/// A publish that has been submitted but not yet confirmed.
///
/// Moved out of a channel that is being replaced and replayed on its
/// successor.
#[derive(Debug)]
pub struct PendingPublish {
    pub stream: LocalStream,
    pub completion: Option<Completion<()>>,
}

pub trait PeerChannel: Send + Sync {
    fn remote_id(&self) -> &RemoteId;

    fn publish(&self, stream: LocalStream, done: Completion<()>);

    fn unpublish(&self, stream: LocalStream, done: Completion<()>);

    fn send(&self, message: String, reliable: bool, done: Completion<()>);

    /// Tear the channel down. Unless suppressed, the remote is told with a
    /// `chat-closed` message. The channel reports through
    /// [`ChannelEventSink::stopped`] once it is gone.
    fn stop(&self, done: Option<Completion<()>>);

    fn connection_stats(&self, done: Completion<ConnectionStats>);

    fn rtc_stats(&self, done: Completion<RtcStatsReport>);

    fn on_incoming_signaling_message(&self, message: &str);

    /// True while a local offer is waiting for its answer.
    fn have_local_offer(&self) -> bool;

    fn take_pending_publish(&self) -> Option<PendingPublish>;

    /// Stop sending signaling of any kind. Irreversible.
    fn set_abandoned(&self);

    fn is_abandoned(&self) -> bool;

    /// Suppress the `chat-closed` notice that `stop` would otherwise send.
    fn disable_sending_stop(&self);
}

/// Everything a channel is constructed from.
#[derive(Clone)]
pub struct ChannelContext {
    pub config: Arc<ChannelConfig>,
    pub local_id: RemoteId,
    pub remote_id: RemoteId,
    pub signaling: SignalingSender,
    pub events: ChannelEventSink,
}

impl fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelContext")
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .field("serial", &self.events.serial)
            .finish()
    }
}

/// Builds channels. Called with the registry lock held, so implementations
/// must not call back into the client.
pub trait ChannelFactory: Send + Sync {
    fn create(&self, ctx: ChannelContext) -> Arc<dyn PeerChannel>;
}

/// Outbound signaling path bound to a single remote.
#[derive(Clone)]
pub struct SignalingSender {
    transport: Arc<dyn SignalingChannel>,
    remote_id: RemoteId,
}

impl SignalingSender {
    pub(crate) fn new(transport: Arc<dyn SignalingChannel>, remote_id: RemoteId) -> Self {
        Self {
            transport,
            remote_id,
        }
    }

    pub fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    pub async fn send(&self, message: &str) -> P2pResult<()> {
        self.transport.send_message(message, &self.remote_id).await
    }
}

/// Channel-to-client notifications, tagged with the channel's incarnation.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    serial: u64,
    remote_id: RemoteId,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelEventSink {
    pub(crate) fn new(
        serial: u64,
        remote_id: RemoteId,
        tx: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            serial,
            remote_id,
            tx,
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn stopped(&self) {
        self.post(ClientEvent::ChannelStopped {
            remote_id: self.remote_id.clone(),
            serial: self.serial,
        });
    }

    pub fn message_received(&self, message: String) {
        self.post(ClientEvent::MessageReceived {
            remote_id: self.remote_id.clone(),
            message,
        });
    }

    pub fn stream_added(&self, stream: RemoteStream) {
        self.post(ClientEvent::StreamAdded(stream));
    }

    fn post(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            trace!(remote_id = %self.remote_id, "client gone, dropping channel event");
        }
    }
}
