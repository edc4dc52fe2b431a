use std::fmt;
use std::sync::Weak;

use crate::client::{ClientInner, P2pClient};
use crate::error::{P2pError, P2pResult};
use crate::identity::RemoteId;
use crate::stats::{ConnectionStats, RtcStatsReport};
use crate::stream::LocalStream;

/// A stream successfully published to one remote.
///
/// Holds the client weakly; once every client handle is dropped the
/// publication's operations fail with [`P2pError::InvalidState`].
pub struct Publication {
    client: Weak<ClientInner>,
    remote_id: RemoteId,
    stream: LocalStream,
}

impl Publication {
    pub(crate) fn new(client: Weak<ClientInner>, remote_id: RemoteId, stream: LocalStream) -> Self {
        Self {
            client,
            remote_id,
            stream,
        }
    }

    pub fn remote_id(&self) -> &RemoteId {
        &self.remote_id
    }

    pub fn stream(&self) -> &LocalStream {
        &self.stream
    }

    /// Unpublish the stream from the remote.
    pub async fn stop(&self) -> P2pResult<()> {
        self.client()?
            .unpublish(self.remote_id.clone(), self.stream.clone())
            .await
    }

    pub async fn stats(&self) -> P2pResult<ConnectionStats> {
        self.client()?.connection_stats(self.remote_id.clone()).await
    }

    pub async fn rtc_stats(&self) -> P2pResult<RtcStatsReport> {
        self.client()?.rtc_stats(self.remote_id.clone()).await
    }

    fn client(&self) -> P2pResult<P2pClient> {
        self.client
            .upgrade()
            .map(P2pClient::from_inner)
            .ok_or_else(|| P2pError::InvalidState("client has been dropped".into()))
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("remote_id", &self.remote_id)
            .field("stream", &self.stream.id())
            .field("client_alive", &(self.client.strong_count() > 0))
            .finish()
    }
}
