#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use peerlink::{
    ChannelContext, ChannelEventSink, ChannelFactory, ClientConfig, Completion, ConnectionStats,
    LocalStream, P2pClient, P2pClientObserver, P2pError, P2pResult, PeerChannel, PendingPublish,
    RemoteId, RemoteStream, RtcStatsReport, SignalingChannel, SignalingSink,
};

/// Poll `condition` every few milliseconds until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Give the background tasks a chance to run when asserting that nothing
/// happens.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[derive(Default)]
pub struct RecordingSignaling {
    sink: Mutex<Option<SignalingSink>>,
    sent: Mutex<Vec<(RemoteId, String)>>,
}

impl RecordingSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inject(&self, from: &str, text: &str) {
        let sink = self.sink.lock().clone();
        sink.expect("client attached a sink").message(from, text);
    }

    pub fn inject_disconnect(&self) {
        let sink = self.sink.lock().clone();
        sink.expect("client attached a sink").server_disconnected();
    }

    pub fn sent(&self) -> Vec<(RemoteId, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SignalingChannel for RecordingSignaling {
    fn attach(&self, sink: SignalingSink) {
        *self.sink.lock() = Some(sink);
    }

    async fn connect(&self, _host: &str, token: &str) -> P2pResult<RemoteId> {
        if token.is_empty() {
            return Err(P2pError::Signaling("empty token".into()));
        }
        Ok(RemoteId::from(token))
    }

    async fn disconnect(&self) -> P2pResult<()> {
        Ok(())
    }

    async fn send_message(&self, message: &str, remote_id: &RemoteId) -> P2pResult<()> {
        self.sent
            .lock()
            .push((remote_id.clone(), message.to_string()));
        Ok(())
    }
}

/// Channel double that records every call. With `auto_answer` a publish
/// succeeds at once; otherwise it stays pending with a local offer
/// outstanding until [`RecordingChannel::answer`] is called.
pub struct RecordingChannel {
    remote_id: RemoteId,
    serial: u64,
    events: ChannelEventSink,
    auto_answer: bool,
    calls: Mutex<Vec<String>>,
    pending: Mutex<Option<PendingPublish>>,
    abandoned: AtomicBool,
    stop_disabled: AtomicBool,
}

impl RecordingChannel {
    fn new(ctx: ChannelContext, auto_answer: bool) -> Self {
        Self {
            remote_id: ctx.remote_id,
            serial: ctx.events.serial(),
            events: ctx.events,
            auto_answer,
            calls: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            abandoned: AtomicBool::new(false),
            stop_disabled: AtomicBool::new(false),
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn events(&self) -> &ChannelEventSink {
        &self.events
    }

    pub fn stop_disabled(&self) -> bool {
        self.stop_disabled.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Complete the outstanding publish as if the remote answered.
    pub fn answer(&self) -> bool {
        let pending = self.pending.lock().take();
        match pending {
            Some(PendingPublish {
                completion: Some(done),
                ..
            }) => {
                done.succeed(());
                true
            }
            _ => false,
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

impl PeerChannel for RecordingChannel {
    fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    fn publish(&self, stream: LocalStream, done: Completion<()>) {
        self.record(format!("publish:{}", stream.id()));
        if self.auto_answer {
            done.succeed(());
        } else {
            *self.pending.lock() = Some(PendingPublish {
                stream,
                completion: Some(done),
            });
        }
    }

    fn unpublish(&self, stream: LocalStream, done: Completion<()>) {
        self.record(format!("unpublish:{}", stream.id()));
        done.succeed(());
    }

    fn send(&self, message: String, reliable: bool, done: Completion<()>) {
        self.record(format!("send:{message}:{reliable}"));
        done.succeed(());
    }

    fn stop(&self, done: Option<Completion<()>>) {
        if self.stop_disabled() {
            self.record("stop:silent");
        } else {
            self.record("stop:notify");
        }
        self.events.stopped();
        if let Some(done) = done {
            done.succeed(());
        }
    }

    fn connection_stats(&self, done: Completion<ConnectionStats>) {
        self.record("connection_stats");
        done.succeed(ConnectionStats {
            messages_sent: 3,
            ..ConnectionStats::default()
        });
    }

    fn rtc_stats(&self, done: Completion<RtcStatsReport>) {
        self.record("rtc_stats");
        done.succeed(RtcStatsReport::new());
    }

    fn on_incoming_signaling_message(&self, message: &str) {
        self.record(format!("incoming:{message}"));
    }

    fn have_local_offer(&self) -> bool {
        self.has_pending()
    }

    fn take_pending_publish(&self) -> Option<PendingPublish> {
        self.pending.lock().take()
    }

    fn set_abandoned(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn disable_sending_stop(&self) {
        self.stop_disabled.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingFactory {
    auto_answer: bool,
    created: Mutex<Vec<Arc<RecordingChannel>>>,
}

impl RecordingFactory {
    pub fn auto_answer() -> Arc<Self> {
        Arc::new(Self {
            auto_answer: true,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn manual() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created_for(&self, remote_id: &str) -> Vec<Arc<RecordingChannel>> {
        self.created
            .lock()
            .iter()
            .filter(|channel| channel.remote_id.as_str() == remote_id)
            .cloned()
            .collect()
    }

    pub fn latest(&self, remote_id: &str) -> Option<Arc<RecordingChannel>> {
        self.created_for(remote_id).pop()
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }
}

impl ChannelFactory for RecordingFactory {
    fn create(&self, ctx: ChannelContext) -> Arc<dyn PeerChannel> {
        let channel = Arc::new(RecordingChannel::new(ctx, self.auto_answer));
        self.created.lock().push(Arc::clone(&channel));
        channel
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn saw(&self, event: &str) -> bool {
        self.events.lock().iter().any(|seen| seen == event)
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl P2pClientObserver for RecordingObserver {
    fn on_server_disconnected(&self) {
        self.push("server-disconnected".into());
    }

    fn on_message_received(&self, remote_id: &RemoteId, message: &str) {
        self.push(format!("message:{remote_id}:{message}"));
    }

    fn on_stream_added(&self, stream: &RemoteStream) {
        self.push(format!("stream:{}:{}", stream.origin(), stream.id()));
    }

    fn on_peer_connection_closed(&self, remote_id: &RemoteId) {
        self.push(format!("closed:{remote_id}"));
    }
}

pub struct Harness {
    pub client: P2pClient,
    pub signaling: Arc<RecordingSignaling>,
    pub factory: Arc<RecordingFactory>,
    pub observer: Arc<RecordingObserver>,
}

/// Client connected as `local_id`, with an observer attached.
pub async fn connected(
    local_id: &str,
    config: ClientConfig,
    factory: Arc<RecordingFactory>,
) -> Harness {
    let signaling = RecordingSignaling::new();
    let client = P2pClient::new(config, signaling.clone(), factory.clone()).expect("client");
    client.connect("local", local_id).await.expect("connect");
    let observer = RecordingObserver::new();
    client.add_observer(observer.clone());
    Harness {
        client,
        signaling,
        factory,
        observer,
    }
}

pub fn offer() -> &'static str {
    r#"{"type":"offer","sdp":"v=0"}"#
}

pub fn closed(code: i32) -> String {
    format!(r#"{{"type":"chat-closed","data":{{"code":{code},"message":"bye"}}}}"#)
}
