use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::RemoteId;

/// A locally captured stream offered to remote peers.
///
/// Capture itself lives outside this crate; only the descriptor travels
/// through the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalStream {
    id: String,
    has_audio: bool,
    has_video: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            has_audio: true,
            has_video: true,
            attributes: BTreeMap::new(),
        }
    }

    /// Stream with a random v4 UUID as its id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn audio_only(mut self) -> Self {
        self.has_video = false;
        self.has_audio = true;
        self
    }

    pub fn video_only(mut self) -> Self {
        self.has_audio = false;
        self.has_video = true;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub fn has_video(&self) -> bool {
        self.has_video
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// A stream announced by a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteStream {
    id: String,
    origin: RemoteId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>, origin: RemoteId) -> Self {
        Self {
            id: id.into(),
            origin,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> &RemoteId {
        &self.origin
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}
