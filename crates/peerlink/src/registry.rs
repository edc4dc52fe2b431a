use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, trace};

use crate::channel::PeerChannel;
use crate::identity::RemoteId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Active,
    Abandoned,
}

#[derive(Clone)]
pub(crate) struct ChannelEntry {
    remote_id: RemoteId,
    serial: u64,
    channel: Arc<dyn PeerChannel>,
}

impl ChannelEntry {
    pub fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn channel(&self) -> &Arc<dyn PeerChannel> {
        &self.channel
    }

    pub fn state(&self) -> ChannelState {
        if self.channel.is_abandoned() {
            ChannelState::Abandoned
        } else {
            ChannelState::Active
        }
    }
}

impl fmt::Debug for ChannelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEntry")
            .field("remote_id", &self.remote_id)
            .field("serial", &self.serial)
            .field("state", &self.state())
            .finish()
    }
}

/// Remote identity to channel map, plus the holding list for channels that
/// have stopped but may still be referenced by in-flight work.
#[derive(Default)]
pub(crate) struct ChannelRegistry {
    channels: RwLock<HashMap<RemoteId, ChannelEntry>>,
    retired: Mutex<Vec<ChannelEntry>>,
    next_serial: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active entry for `remote_id`. Abandoned entries are invisible.
    pub fn get(&self, remote_id: &RemoteId) -> Option<ChannelEntry> {
        self.channels
            .read()
            .get(remote_id)
            .filter(|entry| !entry.channel.is_abandoned())
            .cloned()
    }

    pub fn exists(&self, remote_id: &RemoteId) -> bool {
        self.get(remote_id).is_some()
    }

    /// Raw lookup that also returns abandoned entries.
    pub fn peek(&self, remote_id: &RemoteId) -> Option<ChannelEntry> {
        self.channels.read().get(remote_id).cloned()
    }

    /// Return the active channel, building a new one if there is none, the
    /// current one is abandoned, or `replace` is set. `build` runs under the
    /// registry lock and receives the new entry's serial.
    pub fn get_or_create<F>(&self, remote_id: &RemoteId, replace: bool, build: F) -> ChannelEntry
    where
        F: FnOnce(u64) -> Arc<dyn PeerChannel>,
    {
        let (entry, evicted) = {
            let mut channels = self.channels.write();
            if let Some(existing) = channels.get(remote_id) {
                if !replace && !existing.channel.is_abandoned() {
                    return existing.clone();
                }
            }
            let serial = self.next_serial.fetch_add(1, Ordering::Relaxed) + 1;
            let entry = ChannelEntry {
                remote_id: remote_id.clone(),
                serial,
                channel: build(serial),
            };
            let evicted = channels.insert(remote_id.clone(), entry.clone());
            (entry, evicted)
        };
        if let Some(old) = evicted {
            debug!(
                remote_id = %remote_id,
                old_serial = old.serial,
                serial = entry.serial,
                "replacing channel"
            );
            old.channel.disable_sending_stop();
        } else {
            debug!(remote_id = %remote_id, serial = entry.serial, "created channel");
        }
        entry
    }

    /// Remove the entry only if it is still the incarnation `serial`.
    pub fn remove_if(&self, remote_id: &RemoteId, serial: u64) -> Option<ChannelEntry> {
        let mut channels = self.channels.write();
        let current = channels
            .get(remote_id)
            .is_some_and(|entry| entry.serial == serial);
        if current {
            channels.remove(remote_id)
        } else {
            None
        }
    }

    /// Move a stopped incarnation out of the map into the holding list.
    /// Returns `false` if that incarnation was already gone.
    pub fn retire(&self, remote_id: &RemoteId, serial: u64) -> bool {
        match self.remove_if(remote_id, serial) {
            Some(entry) => {
                self.retired.lock().push(entry);
                true
            }
            None => false,
        }
    }

    /// Release held channels nobody else references. Returns how many were
    /// released.
    pub fn sweep_retired(&self) -> usize {
        let released: Vec<ChannelEntry> = {
            let mut retired = self.retired.lock();
            let (release, keep): (Vec<_>, Vec<_>) = retired
                .drain(..)
                .partition(|entry| Arc::strong_count(&entry.channel) == 1);
            *retired = keep;
            release
        };
        for entry in &released {
            trace!(remote_id = %entry.remote_id, serial = entry.serial, "released channel");
        }
        released.len()
    }

    #[cfg(test)]
    pub fn retired_len(&self) -> usize {
        self.retired.lock().len()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }
}
