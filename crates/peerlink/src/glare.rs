//! Glare resolution for inbound signaling.
//!
//! Both peers run [`resolve`] independently with only their own view of the
//! world. The identity comparison in [`local_yields`] is the only tie-break,
//! so for any two distinct identities exactly one side gives up its offer.

use crate::identity::RemoteId;
use crate::message::SignalingMessage;

/// What the resolver needs to know about the sender's current channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub have_local_offer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareDecision {
    /// Close notice for a remote we have no channel with.
    IgnoreClose,
    /// Both sides offered and we lost the tie-break: drop our channel, answer
    /// theirs, replay our publish.
    YieldToRemote,
    /// Remote asked for a fresh connection: replace the channel and replay.
    Renegotiate,
    /// Remote closed the session.
    Abandon,
    /// Hand the message to the channel.
    Forward,
}

/// True if the local side must give up its own offer when both peers offered
/// at once. The larger identity yields.
pub fn local_yields(local: &RemoteId, remote: &RemoteId) -> bool {
    local > remote
}

pub fn resolve(
    message: &SignalingMessage,
    existing: Option<ChannelSnapshot>,
    local: &RemoteId,
    remote: &RemoteId,
) -> GlareDecision {
    let Some(channel) = existing else {
        return if message.is_closed() {
            GlareDecision::IgnoreClose
        } else {
            GlareDecision::Forward
        };
    };
    match message {
        SignalingMessage::Offer if channel.have_local_offer && local_yields(local, remote) => {
            GlareDecision::YieldToRemote
        }
        SignalingMessage::Closed { .. } if message.is_renegotiation_trigger() => {
            GlareDecision::Renegotiate
        }
        SignalingMessage::Closed { .. } => GlareDecision::Abandon,
        _ => GlareDecision::Forward,
    }
}
