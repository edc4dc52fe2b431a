//! Media-less channel that runs a miniature offer/answer exchange over the
//! signaling transport. Enough to drive the orchestrator end to end.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{
    ChannelContext, ChannelEventSink, ChannelFactory, Completion, PeerChannel, PendingPublish,
    SignalingSender,
};
use crate::config::ChannelConfig;
use crate::error::P2pError;
use crate::identity::RemoteId;
use crate::stats::{ConnectionStats, RtcStat, RtcStatsReport};
use crate::stream::{LocalStream, RemoteStream};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamInfo {
    id: String,
    audio: bool,
    video: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

impl From<&LocalStream> for StreamInfo {
    fn from(stream: &LocalStream) -> Self {
        Self {
            id: stream.id().to_string(),
            audio: stream.has_audio(),
            video: stream.has_video(),
            attributes: stream.attributes().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClosedData {
    code: i32,
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Wire {
    Offer { streams: Vec<StreamInfo> },
    Answer,
    ChatData { data: String },
    ChatUnpublish { streams: Vec<String> },
    ChatClosed { data: ClosedData },
}

struct Outbound {
    text: String,
    done: Option<Completion<()>>,
}

#[derive(Default)]
struct State {
    pending: Option<PendingPublish>,
    local_offer: bool,
    published: Vec<LocalStream>,
    remote_streams: BTreeSet<String>,
    negotiated: bool,
    stopped: bool,
}

#[derive(Default)]
struct Counters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    signaling_sent: AtomicU64,
    signaling_received: AtomicU64,
}

pub struct LoopbackChannel {
    config: Arc<ChannelConfig>,
    local_id: RemoteId,
    remote_id: RemoteId,
    events: ChannelEventSink,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Mutex<State>,
    counters: Counters,
    abandoned: AtomicBool,
    send_stop: AtomicBool,
}

impl LoopbackChannel {
    /// Must be called inside a Tokio runtime; spawns the writer task.
    pub fn new(ctx: ChannelContext) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(ctx.signaling.clone(), rx));
        debug!(
            local_id = %ctx.local_id,
            remote_id = %ctx.remote_id,
            serial = ctx.events.serial(),
            ice_servers = ctx.config.ice_servers.len(),
            "loopback channel created"
        );
        Self {
            config: ctx.config,
            local_id: ctx.local_id,
            remote_id: ctx.remote_id,
            events: ctx.events,
            outbound,
            state: Mutex::new(State::default()),
            counters: Counters::default(),
            abandoned: AtomicBool::new(false),
            send_stop: AtomicBool::new(true),
        }
    }

    /// Queue a wire message. Abandoned channels send nothing.
    fn enqueue(&self, wire: &Wire, done: Option<Completion<()>>) {
        if self.is_abandoned() {
            trace!(remote_id = %self.remote_id, "channel abandoned, not sending");
            if let Some(done) = done {
                done.fail(P2pError::InvalidState("channel is abandoned".into()));
            }
            return;
        }
        let text = match serde_json::to_string(wire) {
            Ok(text) => text,
            Err(err) => {
                if let Some(done) = done {
                    done.fail(P2pError::Channel(err.to_string()));
                }
                return;
            }
        };
        self.counters.signaling_sent.fetch_add(1, Ordering::Relaxed);
        if let Err(mpsc::error::SendError(outbound)) = self.outbound.send(Outbound { text, done }) {
            if let Some(done) = outbound.done {
                done.fail(P2pError::Channel("signaling writer stopped".into()));
            }
        }
    }

    fn offer_for(published: &[LocalStream], next: &LocalStream) -> Wire {
        Wire::Offer {
            streams: published
                .iter()
                .chain(std::iter::once(next))
                .map(StreamInfo::from)
                .collect(),
        }
    }

    fn handle_offer(&self, streams: Vec<StreamInfo>) {
        let added: Vec<RemoteStream> = {
            let mut state = self.state.lock();
            if state.local_offer {
                debug!(remote_id = %self.remote_id, "own offer outstanding, ignoring remote offer");
                return;
            }
            state.negotiated = true;
            streams
                .into_iter()
                .filter(|info| state.remote_streams.insert(info.id.clone()))
                .map(|info| {
                    RemoteStream::new(info.id, self.remote_id.clone())
                        .with_attributes(info.attributes)
                })
                .collect()
        };
        self.enqueue(&Wire::Answer, None);
        for stream in added {
            self.events.stream_added(stream);
        }
    }

    fn handle_answer(&self) {
        let pending = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.take() else {
                debug!(remote_id = %self.remote_id, "answer without a pending publish");
                return;
            };
            state.local_offer = false;
            state.negotiated = true;
            state.published.push(pending.stream.clone());
            pending
        };
        debug!(remote_id = %self.remote_id, stream_id = pending.stream.id(), "publish answered");
        if let Some(done) = pending.completion {
            done.succeed(());
        }
    }
}

async fn run_writer(signaling: SignalingSender, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(Outbound { text, done }) = rx.recv().await {
        let result = signaling.send(&text).await;
        if let Err(err) = &result {
            warn!(remote_id = %signaling.remote_id(), error = %err, "signaling send failed");
        }
        if let Some(done) = done {
            done.complete(result);
        }
    }
}

impl PeerChannel for LoopbackChannel {
    fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    fn publish(&self, stream: LocalStream, done: Completion<()>) {
        let offer = {
            let mut state = self.state.lock();
            if state.stopped {
                drop(state);
                done.fail(P2pError::InvalidState("channel is stopped".into()));
                return;
            }
            if state.pending.is_some() {
                drop(state);
                done.fail(P2pError::InvalidState("a publish is already in progress".into()));
                return;
            }
            if state.published.iter().any(|s| s.id() == stream.id()) {
                drop(state);
                done.fail(P2pError::InvalidState(format!(
                    "stream {} is already published",
                    stream.id()
                )));
                return;
            }
            let offer = Self::offer_for(&state.published, &stream);
            state.local_offer = true;
            state.pending = Some(PendingPublish {
                stream,
                completion: Some(done),
            });
            offer
        };
        self.enqueue(&offer, None);
    }

    fn unpublish(&self, stream: LocalStream, done: Completion<()>) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.published.len();
            state.published.retain(|s| s.id() != stream.id());
            state.published.len() != before
        };
        if !removed {
            done.fail(P2pError::InvalidState(format!(
                "stream {} is not published",
                stream.id()
            )));
            return;
        }
        self.enqueue(
            &Wire::ChatUnpublish {
                streams: vec![stream.id().to_string()],
            },
            Some(done),
        );
    }

    fn send(&self, message: String, reliable: bool, done: Completion<()>) {
        if self.state.lock().stopped {
            done.fail(P2pError::InvalidState("channel is stopped".into()));
            return;
        }
        trace!(remote_id = %self.remote_id, reliable, "sending data");
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.enqueue(&Wire::ChatData { data: message }, Some(done));
    }

    fn stop(&self, done: Option<Completion<()>>) {
        let pending = {
            let mut state = self.state.lock();
            if state.stopped {
                drop(state);
                if let Some(done) = done {
                    done.succeed(());
                }
                return;
            }
            state.stopped = true;
            state.local_offer = false;
            state.pending.take()
        };
        if self.send_stop.load(Ordering::SeqCst) {
            self.enqueue(
                &Wire::ChatClosed {
                    data: ClosedData {
                        code: 0,
                        message: "stopped".into(),
                    },
                },
                None,
            );
        }
        if let Some(PendingPublish {
            completion: Some(completion),
            ..
        }) = pending
        {
            completion.fail(P2pError::Channel("channel stopped".into()));
        }
        debug!(local_id = %self.local_id, remote_id = %self.remote_id, "loopback channel stopped");
        self.events.stopped();
        if let Some(done) = done {
            done.succeed(());
        }
    }

    fn connection_stats(&self, done: Completion<ConnectionStats>) {
        let state = self.state.lock();
        let stats = ConnectionStats {
            timestamp: SystemTime::now(),
            published_streams: state.published.len(),
            remote_streams: state.remote_streams.len(),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            signaling_messages_sent: self.counters.signaling_sent.load(Ordering::Relaxed),
            signaling_messages_received: self.counters.signaling_received.load(Ordering::Relaxed),
            negotiated: state.negotiated,
        };
        drop(state);
        done.succeed(stats);
    }

    fn rtc_stats(&self, done: Completion<RtcStatsReport>) {
        let now = SystemTime::now();
        let mut report = RtcStatsReport::new();
        let stat = |id: String, kind: &str, values: BTreeMap<String, Value>| RtcStat {
            id,
            kind: kind.to_string(),
            timestamp: now,
            values,
        };
        report.insert(stat(
            "T01".into(),
            "transport",
            BTreeMap::from([
                ("iceServers".to_string(), Value::from(self.config.ice_servers.len())),
                (
                    "signalingMessagesSent".to_string(),
                    Value::from(self.counters.signaling_sent.load(Ordering::Relaxed)),
                ),
                (
                    "signalingMessagesReceived".to_string(),
                    Value::from(self.counters.signaling_received.load(Ordering::Relaxed)),
                ),
            ]),
        ));
        report.insert(stat(
            "D01".into(),
            "data-channel",
            BTreeMap::from([
                (
                    "messagesSent".to_string(),
                    Value::from(self.counters.messages_sent.load(Ordering::Relaxed)),
                ),
                (
                    "messagesReceived".to_string(),
                    Value::from(self.counters.messages_received.load(Ordering::Relaxed)),
                ),
            ]),
        ));
        let state = self.state.lock();
        for stream in &state.published {
            report.insert(stat(
                format!("OT_{}", stream.id()),
                "outbound-rtp",
                BTreeMap::from([("trackIdentifier".to_string(), Value::from(stream.id()))]),
            ));
        }
        for id in &state.remote_streams {
            report.insert(stat(
                format!("IT_{id}"),
                "inbound-rtp",
                BTreeMap::from([("trackIdentifier".to_string(), Value::from(id.as_str()))]),
            ));
        }
        drop(state);
        done.succeed(report);
    }

    fn on_incoming_signaling_message(&self, message: &str) {
        self.counters.signaling_received.fetch_add(1, Ordering::Relaxed);
        let wire: Wire = match serde_json::from_str(message) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(remote_id = %self.remote_id, error = %err, "unrecognised signaling message");
                return;
            }
        };
        match wire {
            Wire::Offer { streams } => self.handle_offer(streams),
            Wire::Answer => self.handle_answer(),
            Wire::ChatData { data } => {
                self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
                self.events.message_received(data);
            }
            Wire::ChatUnpublish { streams } => {
                let mut state = self.state.lock();
                for id in streams {
                    state.remote_streams.remove(&id);
                }
            }
            Wire::ChatClosed { data } => {
                debug!(remote_id = %self.remote_id, code = data.code, "remote closed channel");
            }
        }
    }

    fn have_local_offer(&self) -> bool {
        self.state.lock().local_offer
    }

    fn take_pending_publish(&self) -> Option<PendingPublish> {
        self.state.lock().pending.take()
    }

    fn set_abandoned(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn disable_sending_stop(&self) {
        self.send_stop.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackChannelFactory;

impl LoopbackChannelFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelFactory for LoopbackChannelFactory {
    fn create(&self, ctx: ChannelContext) -> Arc<dyn PeerChannel> {
        Arc::new(LoopbackChannel::new(ctx))
    }
}
