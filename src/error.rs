use thiserror::Error;

use crate::alarm::model::TimeValue;

/// Local input errors. Always raised before any state change or network call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid time '{input}', expected HH:MM between 00:00 and 23:59")]
    InvalidFormat { input: String },
    #[error("alarm {0} is already configured")]
    DuplicateAlarm(TimeValue),
}

/// Failures talking to the remote configuration resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("device API unreachable: {0}")]
    NetworkUnavailable(String),
    #[error("device API did not answer in time")]
    Timeout,
    #[error("device API rejected the request: {message}")]
    ServerRejected {
        status: Option<u16>,
        message: String,
    },
    #[error("unexpected response from device API: {0}")]
    MalformedResponse(String),
    #[error("a save is already in flight for device {0}")]
    SaveInProgress(String),
    #[error("load result discarded, a newer load was issued")]
    Superseded,
    #[error("no configuration loaded for device {0}")]
    NotLoaded(String),
}

impl SyncError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable(_) | SyncError::Timeout | SyncError::SaveInProgress(_)
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
