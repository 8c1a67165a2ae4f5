use thiserror::Error;

/// Transport layer failure, reported back to the caller that triggered
/// the request. The cache never retries on its own beyond scheduler
/// re-arming.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Outbound link to the assistance service. The cache hands over one
/// serialized batch request and returns immediately; response bytes come
/// back later through `PgpsCache::process`.
pub trait Transport: Send {
    fn send(&mut self, request: &[u8]) -> Result<(), TransportError>;
}
