mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use peerlink::channel::loopback::LoopbackChannelFactory;
use peerlink::signaling::loopback::LoopbackSignaling;
use peerlink::{LocalStream, P2pClient, P2pClientObserver, RemoteId, RemoteStream};
use signal_bus::{LocalSignalBus, SignalBus};
use tracing::info;

use crate::config::DemoConfig;
use crate::telemetry::init_tracing;

#[derive(Debug, Parser)]
#[command(
    name = "peerlink-demo",
    author,
    version,
    about = "Two in-process peers publishing to each other at the same time"
)]
struct Cli {
    /// Identity of the first peer.
    #[arg(long, default_value = "alice")]
    first: String,

    /// Identity of the second peer.
    #[arg(long, default_value = "bob")]
    second: String,

    /// Text each peer sends once both publishes have completed.
    #[arg(long, default_value = "hello")]
    message: String,

    /// Log filter; overrides PEERLINK_DEMO_LOG and RUST_LOG.
    #[arg(long)]
    log: Option<String>,

    /// Signaling host passed to connect.
    #[arg(long, env = "PEERLINK_SIGNALING_HOST")]
    host: Option<String>,

    /// Milliseconds to wait for observer events before tearing down.
    #[arg(long, default_value_t = 250)]
    settle_ms: u64,
}

struct LoggingObserver {
    peer: String,
}

impl P2pClientObserver for LoggingObserver {
    fn on_server_disconnected(&self) {
        info!(peer = %self.peer, "server disconnected");
    }

    fn on_message_received(&self, remote_id: &RemoteId, message: &str) {
        info!(peer = %self.peer, remote_id = %remote_id, message, "message received");
    }

    fn on_stream_added(&self, stream: &RemoteStream) {
        info!(
            peer = %self.peer,
            remote_id = %stream.origin(),
            stream_id = stream.id(),
            "remote stream added"
        );
    }

    fn on_peer_connection_closed(&self, remote_id: &RemoteId) {
        info!(peer = %self.peer, remote_id = %remote_id, "peer connection closed");
    }
}

async fn start_peer(
    cfg: &DemoConfig,
    bus: Arc<dyn SignalBus>,
    me: &str,
    other: &str,
) -> Result<P2pClient> {
    let client = P2pClient::new(
        cfg.client.clone(),
        Arc::new(LoopbackSignaling::new(bus)),
        Arc::new(LoopbackChannelFactory::new()),
    )
    .with_context(|| format!("creating client for {me}"))?;
    client.add_observer(Arc::new(LoggingObserver {
        peer: me.to_string(),
    }));
    client
        .connect(&cfg.signaling_host, me)
        .await
        .with_context(|| format!("connecting {me}"))?;
    client.add_allowed_remote(other);
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let cfg = DemoConfig::from_env().with_overrides(cli.log.clone(), cli.host.clone());
    init_tracing(&cfg.log_filter);

    let bus: Arc<dyn SignalBus> = Arc::new(LocalSignalBus::new());
    let first = start_peer(&cfg, bus.clone(), &cli.first, &cli.second).await?;
    let second = start_peer(&cfg, bus.clone(), &cli.second, &cli.first).await?;
    info!(
        first = %cli.first,
        second = %cli.second,
        host = %cfg.signaling_host,
        ice_servers = cfg.client.ice_servers.len(),
        "peers connected"
    );

    let (first_pub, second_pub) = tokio::join!(
        first.publish(cli.second.as_str(), LocalStream::generate()),
        second.publish(cli.first.as_str(), LocalStream::generate()),
    );
    let first_pub = first_pub.context("first peer publish")?;
    let second_pub = second_pub.context("second peer publish")?;
    info!(
        first_stream = first_pub.stream().id(),
        second_stream = second_pub.stream().id(),
        "both publishes completed"
    );

    first
        .send(cli.second.as_str(), cli.message.as_str(), true)
        .await
        .context("first peer send")?;
    second
        .send(cli.first.as_str(), cli.message.as_str(), true)
        .await
        .context("second peer send")?;
    tokio::time::sleep(Duration::from_millis(cli.settle_ms)).await;

    let stats = first_pub.stats().await.context("connection stats")?;
    info!(
        published = stats.published_streams,
        remote = stats.remote_streams,
        messages_sent = stats.messages_sent,
        messages_received = stats.messages_received,
        "first peer stats"
    );
    let report = second.rtc_stats(cli.first.as_str()).await.context("rtc stats")?;
    info!(entries = report.len(), "second peer rtc stats");

    first_pub.stop().await.context("unpublish")?;
    first.stop(cli.second.as_str()).await.context("stop")?;
    tokio::time::sleep(Duration::from_millis(cli.settle_ms)).await;
    info!(
        first_has_channel = first.is_channel_created(cli.second.as_str()),
        second_has_channel = second.is_channel_created(cli.first.as_str()),
        "after stop"
    );

    first.disconnect().await.context("disconnect first")?;
    second.disconnect().await.context("disconnect second")?;
    tokio::time::sleep(Duration::from_millis(cli.settle_ms)).await;
    Ok(())
}
