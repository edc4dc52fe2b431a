//! Statistics shapes a channel can report.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Summary counters for one peer connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub timestamp: SystemTime,
    pub published_streams: usize,
    pub remote_streams: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub signaling_messages_sent: u64,
    pub signaling_messages_received: u64,
    pub negotiated: bool,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::UNIX_EPOCH,
            published_streams: 0,
            remote_streams: 0,
            messages_sent: 0,
            messages_received: 0,
            signaling_messages_sent: 0,
            signaling_messages_received: 0,
            negotiated: false,
        }
    }
}

/// One entry of a raw stats report, keyed by stat id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtcStat {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: SystemTime,
    pub values: BTreeMap<String, Value>,
}

/// Raw, keyed stats report in the style of `RTCStatsReport`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtcStatsReport {
    entries: BTreeMap<String, RtcStat>,
}

impl RtcStatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stat: RtcStat) {
        self.entries.insert(stat.id.clone(), stat);
    }

    pub fn get(&self, id: &str) -> Option<&RtcStat> {
        self.entries.get(id)
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a RtcStat> + 'a {
        self.entries.values().filter(move |stat| stat.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
