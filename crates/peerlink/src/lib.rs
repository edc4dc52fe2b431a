//! peerlink: per-peer session orchestration for a signaling-driven P2P client.
//!
//! Responsibilities:
//! - keeping one connection channel per allow-listed remote identity
//! - resolving offer glare deterministically from identity order alone
//! - abandoning, stopping and replacing channels without leaking callbacks
//! - fanning channel and transport events out to registered observers

mod allow_list;
pub mod channel;
mod client;
pub mod config;
mod error;
pub mod glare;
mod identity;
pub mod message;
mod observer;
mod publication;
mod registry;
pub mod signaling;
pub mod stats;
mod stream;

pub use channel::{
    ChannelContext, ChannelEventSink, ChannelFactory, Completion, Outcome, PeerChannel,
    PendingPublish, SignalingSender,
};
pub use client::P2pClient;
pub use config::{ChannelConfig, ClientConfig, TeardownNotice, TeardownPolicy};
pub use error::{P2pError, P2pResult};
pub use identity::RemoteId;
pub use observer::P2pClientObserver;
pub use publication::Publication;
pub use registry::ChannelState;
pub use signaling::{SignalingChannel, SignalingEvent, SignalingSink};
pub use stats::{ConnectionStats, RtcStatsReport};
pub use stream::{LocalStream, RemoteStream};
