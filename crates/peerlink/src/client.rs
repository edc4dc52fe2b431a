use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::allow_list::AllowList;
use crate::channel::{
    ChannelContext, ChannelEventSink, ChannelFactory, Completion, PeerChannel, PendingPublish,
    SignalingSender,
};
use crate::config::{ChannelConfig, ClientConfig, TeardownNotice};
use crate::error::{P2pError, P2pResult};
use crate::glare::{self, ChannelSnapshot, GlareDecision};
use crate::identity::RemoteId;
use crate::message::SignalingMessage;
use crate::observer::{ClientEvent, ObserverSet, P2pClientObserver};
use crate::publication::Publication;
use crate::registry::{ChannelEntry, ChannelRegistry, ChannelState};
use crate::signaling::{SignalingChannel, SignalingEvent, SignalingSink};
use crate::stats::{ConnectionStats, RtcStatsReport};
use crate::stream::LocalStream;

/// Peer-to-peer session orchestrator.
///
/// Cheap to clone; all clones drive the same set of channels. Inbound
/// signaling and observer delivery each run on their own serial task, so
/// glare resolution for one message finishes before the next is looked at.
#[derive(Clone)]
pub struct P2pClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    channel_config: Arc<ChannelConfig>,
    signaling: Arc<dyn SignalingChannel>,
    factory: Arc<dyn ChannelFactory>,
    local_id: OnceLock<RemoteId>,
    allowed: AllowList,
    channels: ChannelRegistry,
    observers: ObserverSet,
    events: mpsc::UnboundedSender<ClientEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl P2pClient {
    /// Build a client and start its background tasks. Fails outside a Tokio
    /// runtime.
    pub fn new(
        config: ClientConfig,
        signaling: Arc<dyn SignalingChannel>,
        factory: Arc<dyn ChannelFactory>,
    ) -> P2pResult<Self> {
        let handle = Handle::try_current()
            .map_err(|_| P2pError::InvalidState("P2pClient requires a Tokio runtime".into()))?;
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            channel_config: Arc::new(ChannelConfig::from_client(&config)),
            config,
            signaling,
            factory,
            local_id: OnceLock::new(),
            allowed: AllowList::new(),
            channels: ChannelRegistry::new(),
            observers: ObserverSet::new(),
            events: event_tx,
            tasks: Mutex::new(Vec::new()),
        });
        inner.signaling.attach(SignalingSink::new(signal_tx));
        let signaling_task = handle.spawn(run_signaling(Arc::downgrade(&inner), signal_rx));
        let event_task = handle.spawn(run_events(Arc::downgrade(&inner), event_rx));
        inner.tasks.lock().extend([signaling_task, event_task]);
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub async fn connect(&self, host: &str, token: &str) -> P2pResult<RemoteId> {
        let assigned = self.inner.signaling.connect(host, token).await?;
        match self.inner.local_id.get() {
            Some(current) if *current != assigned => {
                warn!(
                    local_id = %current,
                    assigned = %assigned,
                    "signaling reported a different identity, keeping the first"
                );
                Ok(current.clone())
            }
            Some(current) => Ok(current.clone()),
            None => {
                let local_id = self.inner.local_id.get_or_init(|| assigned).clone();
                info!(local_id = %local_id, host, "connected to signaling");
                Ok(local_id)
            }
        }
    }

    pub async fn disconnect(&self) -> P2pResult<()> {
        self.inner.signaling.disconnect().await
    }

    /// Adding an identity that is already allowed is a no-op.
    pub fn add_allowed_remote(&self, remote_id: impl Into<RemoteId>) {
        self.inner.allowed.add(remote_id.into());
    }

    /// Forget `remote_id` and stop its channel, if any.
    pub async fn remove_allowed_remote(&self, remote_id: impl Into<RemoteId>) -> P2pResult<()> {
        let remote_id = remote_id.into();
        if !self.inner.allowed.remove(&remote_id) {
            return Err(P2pError::RemoteNotExisted(remote_id));
        }
        match self.inner.channels.get(&remote_id) {
            Some(entry) => self.stop_entry(entry).await,
            None => Ok(()),
        }
    }

    pub async fn publish(
        &self,
        remote_id: impl Into<RemoteId>,
        stream: LocalStream,
    ) -> P2pResult<Publication> {
        let remote_id = remote_id.into();
        self.inner.ensure_allowed(&remote_id)?;
        let entry = self.inner.channel_for(&remote_id)?;
        let (done, outcome) = Completion::pair();
        debug!(remote_id = %remote_id, serial = entry.serial(), stream_id = stream.id(), "publishing");
        entry.channel().publish(stream.clone(), done);
        drop(entry);
        outcome.await?;
        Ok(Publication::new(
            Arc::downgrade(&self.inner),
            remote_id,
            stream,
        ))
    }

    pub async fn unpublish(
        &self,
        remote_id: impl Into<RemoteId>,
        stream: LocalStream,
    ) -> P2pResult<()> {
        let remote_id = remote_id.into();
        let channel = self.inner.existing_channel(&remote_id, "unpublish")?;
        let (done, outcome) = Completion::pair();
        channel.unpublish(stream, done);
        drop(channel);
        outcome.await
    }

    pub async fn send(
        &self,
        remote_id: impl Into<RemoteId>,
        message: impl Into<String>,
        reliable: bool,
    ) -> P2pResult<()> {
        let remote_id = remote_id.into();
        self.inner.ensure_allowed(&remote_id)?;
        let entry = self.inner.channel_for(&remote_id)?;
        let (done, outcome) = Completion::pair();
        entry.channel().send(message.into(), reliable, done);
        drop(entry);
        outcome.await
    }

    pub async fn stop(&self, remote_id: impl Into<RemoteId>) -> P2pResult<()> {
        let remote_id = remote_id.into();
        let entry = self
            .inner
            .channels
            .get(&remote_id)
            .ok_or_else(|| P2pError::no_channel(&remote_id, "stop"))?;
        self.stop_entry(entry).await
    }

    pub async fn connection_stats(
        &self,
        remote_id: impl Into<RemoteId>,
    ) -> P2pResult<ConnectionStats> {
        let remote_id = remote_id.into();
        let channel = self.inner.existing_channel(&remote_id, "stats")?;
        let (done, outcome) = Completion::pair();
        channel.connection_stats(done);
        drop(channel);
        outcome.await
    }

    pub async fn rtc_stats(&self, remote_id: impl Into<RemoteId>) -> P2pResult<RtcStatsReport> {
        let remote_id = remote_id.into();
        let channel = self.inner.existing_channel(&remote_id, "stats")?;
        let (done, outcome) = Completion::pair();
        channel.rtc_stats(done);
        drop(channel);
        outcome.await
    }

    pub fn is_channel_created(&self, remote_id: impl Into<RemoteId>) -> bool {
        self.inner.channels.exists(&remote_id.into())
    }

    /// State of the registered channel, including one that is abandoned but
    /// not yet replaced.
    pub fn channel_state(&self, remote_id: impl Into<RemoteId>) -> Option<ChannelState> {
        self.inner
            .channels
            .peek(&remote_id.into())
            .map(|entry| entry.state())
    }

    pub fn local_id(&self) -> Option<RemoteId> {
        self.inner.local_id.get().cloned()
    }

    pub fn allowed_remotes(&self) -> Vec<RemoteId> {
        self.inner.allowed.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns `false` if this observer is already registered.
    pub fn add_observer(&self, observer: Arc<dyn P2pClientObserver>) -> bool {
        self.inner.observers.add(observer)
    }

    pub fn remove_observer(&self, observer: &Arc<dyn P2pClientObserver>) -> bool {
        self.inner.observers.remove(observer)
    }

    async fn stop_entry(&self, entry: ChannelEntry) -> P2pResult<()> {
        self.inner
            .channels
            .remove_if(entry.remote_id(), entry.serial());
        info!(remote_id = %entry.remote_id(), serial = entry.serial(), "stopping channel");
        let (done, outcome) = Completion::pair();
        entry.channel().stop(Some(done));
        drop(entry);
        outcome.await
    }
}

impl fmt::Debug for P2pClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("P2pClient")
            .field("local_id", &self.inner.local_id.get())
            .field("channels", &self.inner.channels.len())
            .field("observers", &self.inner.observers.len())
            .finish()
    }
}

impl ClientInner {
    fn ensure_allowed(&self, remote_id: &RemoteId) -> P2pResult<()> {
        if self.allowed.contains(remote_id) {
            Ok(())
        } else {
            Err(P2pError::RemoteNotAllowed(remote_id.clone()))
        }
    }

    fn existing_channel(
        &self,
        remote_id: &RemoteId,
        action: &str,
    ) -> P2pResult<Arc<dyn PeerChannel>> {
        self.channels
            .get(remote_id)
            .map(|entry| entry.channel().clone())
            .ok_or_else(|| P2pError::no_channel(remote_id, action))
    }

    fn connected_id(&self) -> P2pResult<&RemoteId> {
        self.local_id
            .get()
            .ok_or_else(|| P2pError::InvalidState("signaling is not connected".into()))
    }

    /// Active channel for `remote_id`, created on first use.
    fn channel_for(&self, remote_id: &RemoteId) -> P2pResult<ChannelEntry> {
        let local_id = self.connected_id()?;
        Ok(self.channels.get_or_create(remote_id, false, |serial| {
            self.build_channel(local_id, remote_id, serial)
        }))
    }

    fn build_channel(
        &self,
        local_id: &RemoteId,
        remote_id: &RemoteId,
        serial: u64,
    ) -> Arc<dyn PeerChannel> {
        self.factory.create(ChannelContext {
            config: Arc::clone(&self.channel_config),
            local_id: local_id.clone(),
            remote_id: remote_id.clone(),
            signaling: SignalingSender::new(Arc::clone(&self.signaling), remote_id.clone()),
            events: ChannelEventSink::new(serial, remote_id.clone(), self.events.clone()),
        })
    }

    fn post(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            trace!("event task gone, dropping client event");
        }
    }

    fn handle_signaling_message(&self, from: RemoteId, text: String) {
        if !self.allowed.contains(&from) {
            warn!(remote_id = %from, "signaling from a remote that is not allowed, dropped");
            return;
        }
        let message = match SignalingMessage::decode(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!(remote_id = %from, error = %err, "malformed signaling message, dropped");
                return;
            }
        };
        let Ok(local_id) = self.connected_id() else {
            warn!(remote_id = %from, "signaling before connect, dropped");
            return;
        };

        let existing = self.channels.get(&from);
        let snapshot = existing.as_ref().map(|entry| ChannelSnapshot {
            have_local_offer: entry.channel().have_local_offer(),
        });
        let decision = glare::resolve(&message, snapshot, local_id, &from);

        match (decision, existing) {
            (GlareDecision::IgnoreClose, _) => {
                info!(remote_id = %from, "close for a channel that does not exist, ignored");
            }
            (GlareDecision::YieldToRemote, Some(old)) => {
                info!(
                    remote_id = %from,
                    serial = old.serial(),
                    decision = ?decision,
                    "glare, local offer withdrawn"
                );
                let pending = old.channel().take_pending_publish();
                self.channels.remove_if(&from, old.serial());
                let fresh = self.channels.get_or_create(&from, false, |serial| {
                    self.build_channel(local_id, &from, serial)
                });
                if self.config.teardown.on_glare_yield == TeardownNotice::Silent {
                    old.channel().disable_sending_stop();
                }
                old.channel().stop(None);
                fresh.channel().on_incoming_signaling_message(&text);
                replay(&fresh, pending);
            }
            (GlareDecision::Renegotiate, Some(old)) => {
                info!(
                    remote_id = %from,
                    serial = old.serial(),
                    decision = ?decision,
                    "remote asked for a new connection"
                );
                let pending = old.channel().take_pending_publish();
                self.channels.remove_if(&from, old.serial());
                let fresh = self.channels.get_or_create(&from, false, |serial| {
                    self.build_channel(local_id, &from, serial)
                });
                // The remote already dropped its side; a close now would
                // abandon the replacement it asked for.
                old.channel().set_abandoned();
                replay(&fresh, pending);
            }
            (GlareDecision::Abandon, Some(old)) => {
                info!(
                    remote_id = %from,
                    serial = old.serial(),
                    decision = ?decision,
                    "remote closed the session"
                );
                self.channels.remove_if(&from, old.serial());
                if !self.tear_down(&old, self.config.teardown.on_abandon) {
                    self.post(ClientEvent::PeerAbandoned { remote_id: from });
                }
            }
            (_, existing) => {
                let entry = match existing {
                    Some(entry) => entry,
                    None => self.channels.get_or_create(&from, false, |serial| {
                        self.build_channel(local_id, &from, serial)
                    }),
                };
                debug!(remote_id = %from, serial = entry.serial(), "forwarding signaling message");
                entry.channel().on_incoming_signaling_message(&text);
            }
        }
    }

    /// Retire a channel that is no longer registered. Returns `true` if the
    /// channel was stopped, in which case it reports its own closure.
    fn tear_down(&self, entry: &ChannelEntry, notice: TeardownNotice) -> bool {
        match notice {
            TeardownNotice::Silent => {
                entry.channel().set_abandoned();
                false
            }
            TeardownNotice::Notify => {
                entry.channel().stop(None);
                true
            }
        }
    }

    fn dispatch(&self, event: ClientEvent) {
        match event {
            ClientEvent::ServerDisconnected => {
                for observer in self.observers.snapshot() {
                    observer.on_server_disconnected();
                }
            }
            ClientEvent::MessageReceived { remote_id, message } => {
                for observer in self.observers.snapshot() {
                    observer.on_message_received(&remote_id, &message);
                }
            }
            ClientEvent::StreamAdded(stream) => {
                for observer in self.observers.snapshot() {
                    observer.on_stream_added(&stream);
                }
            }
            ClientEvent::ChannelStopped { remote_id, serial } => {
                let retired = self.channels.retire(&remote_id, serial);
                debug!(remote_id = %remote_id, serial, retired, "channel stopped");
                if !self.channels.exists(&remote_id) {
                    self.peer_connection_closed(&remote_id);
                }
            }
            ClientEvent::PeerAbandoned { remote_id } => {
                self.peer_connection_closed(&remote_id);
            }
        }
        let released = self.channels.sweep_retired();
        if released > 0 {
            trace!(released, "released retired channels");
        }
    }

    #[cfg(feature = "peer-closed-events")]
    fn peer_connection_closed(&self, remote_id: &RemoteId) {
        for observer in self.observers.snapshot() {
            observer.on_peer_connection_closed(remote_id);
        }
    }

    #[cfg(not(feature = "peer-closed-events"))]
    fn peer_connection_closed(&self, remote_id: &RemoteId) {
        trace!(remote_id = %remote_id, "peer connection closed");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn replay(fresh: &ChannelEntry, pending: Option<PendingPublish>) {
    let Some(PendingPublish { stream, completion }) = pending else {
        return;
    };
    debug!(
        remote_id = %fresh.remote_id(),
        serial = fresh.serial(),
        stream_id = stream.id(),
        "replaying publish on replacement channel"
    );
    fresh
        .channel()
        .publish(stream, completion.unwrap_or_else(Completion::detached));
}

async fn run_signaling(client: Weak<ClientInner>, mut rx: mpsc::UnboundedReceiver<SignalingEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };
        match event {
            SignalingEvent::Message { from, text } => inner.handle_signaling_message(from, text),
            SignalingEvent::ServerDisconnected => {
                info!("signaling server disconnected");
                inner.post(ClientEvent::ServerDisconnected);
            }
        }
    }
    debug!("signaling task finished");
}

async fn run_events(client: Weak<ClientInner>, mut rx: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };
        inner.dispatch(event);
    }
    debug!("event task finished");
}
