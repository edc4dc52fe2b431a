use std::collections::BTreeSet;

use parking_lot::RwLock;
use tracing::debug;

use crate::identity::RemoteId;

/// Remote identities this client may exchange signaling with.
#[derive(Debug, Default)]
pub(crate) struct AllowList {
    remotes: RwLock<BTreeSet<RemoteId>>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the identity was already present.
    pub fn add(&self, remote_id: RemoteId) -> bool {
        let mut remotes = self.remotes.write();
        if remotes.contains(&remote_id) {
            debug!(remote_id = %remote_id, "remote already allowed");
            return false;
        }
        remotes.insert(remote_id)
    }

    /// Returns `false` if the identity was never added.
    pub fn remove(&self, remote_id: &RemoteId) -> bool {
        self.remotes.write().remove(remote_id)
    }

    pub fn contains(&self, remote_id: &RemoteId) -> bool {
        self.remotes.read().contains(remote_id)
    }

    pub fn snapshot(&self) -> Vec<RemoteId> {
        self.remotes.read().iter().cloned().collect()
    }
}
