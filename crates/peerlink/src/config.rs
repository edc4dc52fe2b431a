use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown video codec: {0}")]
    UnknownVideoCodec(String),
    #[error("unknown audio codec: {0}")]
    UnknownAudioCodec(String),
    #[error("unknown candidate network policy: {0}")]
    UnknownNetworkPolicy(String),
    #[error("ice server entry has no urls: {0}")]
    EmptyIceServer(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl FromStr for IceServer {
    type Err = ConfigError;

    /// `url[,url...][|username|password]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '|');
        let urls: Vec<String> = parts
            .next()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if urls.is_empty() {
            return Err(ConfigError::EmptyIceServer(s.to_string()));
        }
        Ok(Self {
            urls,
            username: parts.next().unwrap_or_default().to_string(),
            password: parts.next().unwrap_or_default().to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateNetworkPolicy {
    #[default]
    All,
    LowCost,
}

impl FromStr for CandidateNetworkPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "low-cost" | "lowcost" | "low_cost" => Ok(Self::LowCost),
            other => Err(ConfigError::UnknownNetworkPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Vp8,
    Vp9,
    H264,
    H265,
    Av1,
}

impl FromStr for VideoCodec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vp8" => Ok(Self::Vp8),
            "vp9" => Ok(Self::Vp9),
            "h264" => Ok(Self::H264),
            "h265" | "hevc" => Ok(Self::H265),
            "av1" => Ok(Self::Av1),
            other => Err(ConfigError::UnknownVideoCodec(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Opus,
    Isac,
    G722,
    Pcmu,
    Pcma,
    Ilbc,
}

impl FromStr for AudioCodec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opus" => Ok(Self::Opus),
            "isac" => Ok(Self::Isac),
            "g722" => Ok(Self::G722),
            "pcmu" => Ok(Self::Pcmu),
            "pcma" => Ok(Self::Pcma),
            "ilbc" => Ok(Self::Ilbc),
            other => Err(ConfigError::UnknownAudioCodec(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEncoding {
    pub codec: VideoCodec,
    pub max_bitrate_kbps: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEncoding {
    pub codec: AudioCodec,
    pub max_bitrate_kbps: Option<u32>,
}

/// Whether tearing a channel down tells the remote peer about it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownNotice {
    #[default]
    Silent,
    Notify,
}

/// Remote notification policy for the two orchestrator-initiated teardowns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownPolicy {
    /// Local side lost a glare tie-break and discards its offering channel.
    pub on_glare_yield: TeardownNotice,
    /// Remote sent a `chat-closed` that ends the session. A renegotiation
    /// trigger always replaces the channel silently.
    pub on_abandon: TeardownNotice,
}

/// Orchestrator configuration, immutable once the client is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub ice_servers: Vec<IceServer>,
    pub candidate_network_policy: CandidateNetworkPolicy,
    pub video_encodings: Vec<VideoEncoding>,
    pub audio_encodings: Vec<AudioEncoding>,
    pub teardown: TeardownPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: String::new(),
                password: String::new(),
            }],
            candidate_network_policy: CandidateNetworkPolicy::All,
            video_encodings: Vec::new(),
            audio_encodings: Vec::new(),
            teardown: TeardownPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from `PEERLINK_*` environment variables, falling back
    /// to defaults. Unparseable entries are skipped with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ice_servers = match env::var("PEERLINK_ICE_SERVERS") {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => parse_list(&raw, ';'),
            Err(_) => defaults.ice_servers,
        };
        let candidate_network_policy = env::var("PEERLINK_NETWORK_POLICY")
            .ok()
            .and_then(|raw| match raw.parse() {
                Ok(policy) => Some(policy),
                Err(err) => {
                    warn!(error = %err, "ignoring PEERLINK_NETWORK_POLICY");
                    None
                }
            })
            .unwrap_or_default();
        let video_encodings = env::var("PEERLINK_VIDEO_CODECS")
            .map(|raw| {
                parse_list::<VideoCodec>(&raw, ',')
                    .into_iter()
                    .map(|codec| VideoEncoding {
                        codec,
                        max_bitrate_kbps: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let audio_encodings = env::var("PEERLINK_AUDIO_CODECS")
            .map(|raw| {
                parse_list::<AudioCodec>(&raw, ',')
                    .into_iter()
                    .map(|codec| AudioEncoding {
                        codec,
                        max_bitrate_kbps: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let teardown = TeardownPolicy {
            on_glare_yield: notice_from_env("PEERLINK_GLARE_NOTIFY"),
            on_abandon: notice_from_env("PEERLINK_ABANDON_NOTIFY"),
        };
        Self {
            ice_servers,
            candidate_network_policy,
            video_encodings,
            audio_encodings,
            teardown,
        }
    }
}

fn parse_list<T>(raw: &str, separator: char) -> Vec<T>
where
    T: FromStr<Err = ConfigError>,
{
    raw.split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.parse() {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "skipping config entry");
                None
            }
        })
        .collect()
}

fn notice_from_env(key: &str) -> TeardownNotice {
    match env::var(key) {
        Ok(value) if matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on") => {
            TeardownNotice::Notify
        }
        _ => TeardownNotice::Silent,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContinualGatheringPolicy {
    GatherOnce,
    #[default]
    GatherContinually,
}

/// Construction parameters handed to every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub ice_servers: Vec<IceServer>,
    pub candidate_network_policy: CandidateNetworkPolicy,
    pub video: Vec<VideoEncoding>,
    pub audio: Vec<AudioEncoding>,
    pub continual_gathering: ContinualGatheringPolicy,
}

impl ChannelConfig {
    pub fn from_client(config: &ClientConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            candidate_network_policy: config.candidate_network_policy,
            video: config.video_encodings.clone(),
            audio: config.audio_encodings.clone(),
            // Publishers create their connection before the remote's
            // capabilities are known, so gathering never stops.
            continual_gathering: ContinualGatheringPolicy::GatherContinually,
        }
    }

    /// Peer connection configuration for a `webrtc`-backed channel. A
    /// `ChannelFactory` that drives real peer connections builds each one
    /// from `ChannelContext::config` through this.
    pub fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.password.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}
