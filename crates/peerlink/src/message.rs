//! Classification of inbound signaling payloads.
//!
//! The orchestrator only needs to know whether a payload is an offer, an
//! answer, or a close notice. Everything else is passed through to the channel
//! untouched.

use serde::Deserialize;
use serde_json::Value;

/// `chat-closed` code meaning the remote cannot honour our ICE gathering
/// policy and wants a fresh connection.
pub const ICE_GATHERING_POLICY_UNSUPPORTED: i32 = 2601;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Offer,
    Answer,
    Closed { code: i32, reason: String },
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

impl SignalingMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Ok(match envelope.kind.as_str() {
            "offer" => SignalingMessage::Offer,
            "answer" => SignalingMessage::Answer,
            "chat-closed" => closed_from(envelope.data.as_ref()),
            "chat-signal" => {
                let inner = envelope
                    .data
                    .as_ref()
                    .and_then(|data| data.get("type"))
                    .and_then(Value::as_str);
                match inner {
                    Some("offer") => SignalingMessage::Offer,
                    Some("answer") => SignalingMessage::Answer,
                    _ => SignalingMessage::Unknown(envelope.kind),
                }
            }
            _ => SignalingMessage::Unknown(envelope.kind),
        })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SignalingMessage::Closed { .. })
    }

    /// A close that asks for a replacement channel rather than a teardown.
    pub fn is_renegotiation_trigger(&self) -> bool {
        matches!(
            self,
            SignalingMessage::Closed { code, .. } if *code == ICE_GATHERING_POLICY_UNSUPPORTED
        )
    }
}

fn closed_from(data: Option<&Value>) -> SignalingMessage {
    let code = data
        .and_then(|d| d.get("code"))
        .and_then(Value::as_i64)
        .and_then(|c| i32::try_from(c).ok())
        .unwrap_or(0);
    let reason = data
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    SignalingMessage::Closed { code, reason }
}
