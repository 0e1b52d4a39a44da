//! The shared remote tier.
//!
//! A [`RemoteStore`] is a plain bytes-in, bytes-out key value store shared by all processes
//! working on the same `topic`. [`RemoteTier`] puts the [`Codec`] and a per-call timeout in front
//! of it. The remote tier is strictly best effort: every failure is logged, counted and then
//! treated as a miss (for reads) or ignored (for writes). Writes never block callers, they go
//! through a bounded queue drained by a background worker.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use super::codec::{Codec, Fingerprint};
use super::{CacheError, Entry};
use upload::Uploader;

mod config;
mod fs;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod upload;

pub use config::{FilesystemRemoteStoreConfig, RemoteStoreConfig};
pub use fs::FilesystemRemoteStore;
pub use memory::MemoryRemoteStore;
#[cfg(feature = "redis")]
pub use redis::{RedisRemoteStore, RedisRemoteStoreConfig};

/// A key value store shared between cooperating processes.
///
/// Implementations must be safe to use concurrently. They do not need to enforce timeouts, the
/// cache bounds every call by its `remote_timeout`.
pub trait RemoteStore: fmt::Debug + Send + Sync + 'static {
    /// A short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Reads the record stored under `fingerprint`, `None` if there is none.
    fn get<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, anyhow::Result<Option<Vec<u8>>>>;

    /// Stores `bytes` under `fingerprint`, replacing any previous record.
    ///
    /// The record may be discarded by the store once `ttl` has passed.
    fn set<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

pub type RemoteStoreRef = Arc<dyn RemoteStore>;

pub(crate) struct RemoteTier {
    remote: Option<Remote>,
    codec: Codec,
    timeout: Duration,
}

struct Remote {
    store: RemoteStoreRef,
    uploader: Uploader,
}

impl fmt::Debug for RemoteTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTier")
            .field("store", &self.remote.as_ref().map(|r| r.store.name()))
            .field("topic", &self.codec.topic())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteTier {
    /// Puts `store` behind the codec, a per-call `timeout` and a background upload queue.
    ///
    /// The upload worker is spawned right away, so with a `store` this needs a tokio runtime.
    pub fn new(
        store: Option<RemoteStoreRef>,
        codec: Codec,
        timeout: Duration,
        max_concurrent_uploads: usize,
        max_upload_queue_size: usize,
    ) -> anyhow::Result<Self> {
        let remote = match store {
            Some(store) => {
                let runtime = Handle::try_current()
                    .context("the remote tier needs to be created within a tokio runtime")?;
                let uploader = Uploader::spawn(
                    &runtime,
                    Arc::clone(&store),
                    timeout,
                    Arc::from(codec.topic()),
                    max_concurrent_uploads,
                    max_upload_queue_size,
                );
                Some(Remote { store, uploader })
            }
            None => None,
        };
        Ok(Self {
            remote,
            codec,
            timeout,
        })
    }

    /// A tier without a store, where every read misses.
    pub fn disabled(codec: Codec) -> Self {
        Self {
            remote: None,
            codec,
            timeout: Duration::ZERO,
        }
    }

    /// The configured per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reads an unexpired entry for `key`, waiting at most `timeout`.
    pub async fn get<K, V>(
        &self,
        key: &K,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Option<Entry<V>>
    where
        K: Serialize,
        V: DeserializeOwned,
    {
        let store = &self.remote.as_ref()?.store;
        let topic = self.codec.topic();

        let fingerprint = match self.codec.fingerprint(key) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    cache = topic,
                    "Failed to derive fingerprint, skipping remote tier"
                );
                return None;
            }
        };

        let res = match tokio::time::timeout(timeout, store.get(&fingerprint)).await {
            Ok(Ok(Some(bytes))) => self.codec.decode(&bytes).map(Some),
            Ok(Ok(None)) => Ok(None),
            Ok(Err(err)) => Err(CacheError::RemoteUnavailable(format!("{err:#}"))),
            Err(_) => Err(CacheError::RemoteTimeout(timeout)),
        };

        match res {
            Ok(Some(entry)) if !entry.is_expired(now) => {
                tracing::trace!(%fingerprint, "Remote tier hit");
                metric!(
                    counter("caches.remote.fetch") += 1,
                    "cache" => topic,
                    "backend" => store.name(),
                    "hit" => "true",
                    "status" => "ok",
                );
                Some(entry)
            }
            Ok(_) => {
                tracing::trace!(%fingerprint, "Remote tier miss");
                metric!(
                    counter("caches.remote.fetch") += 1,
                    "cache" => topic,
                    "backend" => store.name(),
                    "hit" => "false",
                    "status" => "ok",
                );
                None
            }
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    %fingerprint,
                    backend = store.name(),
                    "Error fetching from remote tier"
                );
                metric!(
                    counter("caches.remote.fetch") += 1,
                    "cache" => topic,
                    "backend" => store.name(),
                    "status" => "error",
                    "errdetails" => err.metrics_tag(),
                );
                None
            }
        }
    }

    /// Queues `entry` for `key` to be written in the background, kept by the store for `ttl`.
    ///
    /// The returned receiver resolves once the write is done. It errors if the write was
    /// dropped, and resolves right away when there is nothing to write.
    pub fn store<K, V>(&self, key: &K, entry: &Entry<V>, ttl: Duration) -> oneshot::Receiver<()>
    where
        K: Serialize,
        V: Serialize,
    {
        let Some(remote) = self.remote.as_ref() else {
            return done();
        };

        let encoded = self
            .codec
            .fingerprint(key)
            .and_then(|fingerprint| Ok((fingerprint, self.codec.encode(entry)?)));
        match encoded {
            Ok((fingerprint, bytes)) => remote.uploader.store(fingerprint, bytes, ttl),
            Err(err) => {
                let topic = self.codec.topic();
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    cache = topic,
                    backend = remote.store.name(),
                    "Failed to encode entry for remote tier"
                );
                metric!(
                    counter("caches.remote.store") += 1,
                    "cache" => topic,
                    "backend" => remote.store.name(),
                    "status" => "error",
                    "errdetails" => err.metrics_tag(),
                );
                done()
            }
        }
    }
}

fn done() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(());
    rx
}
