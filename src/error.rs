use thiserror::Error;

use crate::inject::InjectionError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Errors returned by the P-GPS cache.
#[derive(Debug, Error)]
pub enum Error {
    /// Current time is unknown and no prediction is stored yet.
    #[error("current time unknown and no prediction stored")]
    NotYetKnown,
    /// No prediction found, a download is in progress.
    #[error("predictions are being loaded")]
    Loading,
    /// Every stored prediction interval has lapsed.
    #[error("all stored predictions have expired")]
    Expired,
    /// Malformed request parameters or assistance mask.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Stored predictions failed integrity validation.
    #[error("stored predictions failed integrity validation")]
    StorageCorrupt,
    /// Malformed prediction stream, response discarded.
    #[error("malformed prediction stream: {0}")]
    Decode(&'static str),
    #[error("transport failure")]
    Transport(#[from] TransportError),
    #[error("storage failure")]
    Storage(#[from] StorageError),
    #[error("injection failure")]
    Injection(#[from] InjectionError),
}
