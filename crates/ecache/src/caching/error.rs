use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An error that happens while loading, reading or publishing a cache entry.
///
/// Only [`RefreshTimeout`](Self::RefreshTimeout), [`RefreshFailed`](Self::RefreshFailed) and
/// [`Cancelled`](Self::Cancelled) are ever returned to callers. The remaining variants describe
/// failures of the remote tier, which are logged and treated as a miss.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The recompute function did not finish within the configured `refresh_timeout`.
    ///
    /// The recompute itself keeps running in the background.
    #[error("refresh timed out after {0:?}")]
    RefreshTimeout(Duration),
    /// The recompute function returned an error.
    #[error("refresh failed: {0}")]
    RefreshFailed(#[source] Arc<dyn StdError + Send + Sync + 'static>),
    /// An entry could not be serialized for the remote tier.
    #[error("failed to encode entry: {0}")]
    Encode(String),
    /// Bytes read from the remote tier are not a valid entry.
    #[error("failed to decode entry: {0}")]
    Decode(String),
    /// The remote store returned an error.
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
    /// The remote store did not answer within the configured `remote_timeout`.
    #[error("remote store timed out after {0:?}")]
    RemoteTimeout(Duration),
    /// The cache was stopped before the recompute finished.
    #[error("cache was stopped")]
    Cancelled,
}

impl CacheError {
    /// Wraps an error returned by a recompute function.
    pub fn refresh_failed(err: anyhow::Error) -> Self {
        let err: Box<dyn StdError + Send + Sync + 'static> = err.into();
        Self::RefreshFailed(Arc::from(err))
    }

    /// A short, stable name of the variant for use in metric tags.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            CacheError::RefreshTimeout(_) => "timeout",
            CacheError::RefreshFailed(_) => "failed",
            CacheError::Encode(_) => "encode",
            CacheError::Decode(_) => "decode",
            CacheError::RemoteUnavailable(_) => "remote-unavailable",
            CacheError::RemoteTimeout(_) => "remote-timeout",
            CacheError::Cancelled => "cancelled",
        }
    }
}
