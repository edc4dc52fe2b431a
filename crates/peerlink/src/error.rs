use thiserror::Error;

use crate::identity::RemoteId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum P2pError {
    #[error("remote {0} is not on the allow-list")]
    RemoteNotAllowed(RemoteId),
    #[error("remote {0} was never added to the allow-list")]
    RemoteNotExisted(RemoteId),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("signaling error: {0}")]
    Signaling(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("operation was dropped before it completed")]
    Dropped,
}

pub type P2pResult<T> = Result<T, P2pError>;

impl P2pError {
    pub(crate) fn no_channel(remote_id: &RemoteId, action: &str) -> Self {
        P2pError::InvalidState(format!("no channel to {remote_id}, {action} not possible"))
    }
}

impl From<signal_bus::BusError> for P2pError {
    fn from(value: signal_bus::BusError) -> Self {
        P2pError::Signaling(value.to_string())
    }
}
