use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::chain::TierChain;
use super::clock::Clock;
use super::codec::Codec;
use super::loader::{Loader, Recompute};
use super::refresher::Refresher;
use super::remote::{RemoteStoreRef, RemoteTier};
use super::{CacheError, CacheKey, CacheValue, Entry};
use crate::config::CacheConfig;

/// A two-tier refresh-ahead cache.
///
/// Cloning is cheap, all clones share the same tiers, in-flight recomputes and background
/// refresher. When the last clone is dropped, background work is cancelled.
pub struct RefreshCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for RefreshCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for RefreshCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCache")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

pub(crate) struct CacheInner<K, V> {
    config: CacheConfig,
    chain: Arc<TierChain<K, V>>,
    loader: Loader<K, V>,
    shutdown: CancellationToken,
    refresher: Mutex<Option<Refresher>>,
}

impl<K, V> Drop for CacheInner<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<K: CacheKey, V: CacheValue> RefreshCache<K, V> {
    /// Creates a new cache.
    ///
    /// Without a `remote` store the cache runs with the local tier only. With one, or if the
    /// config has a `refresh_interval`, background tasks are spawned right away, which requires
    /// a tokio runtime.
    pub fn new<R>(
        config: CacheConfig,
        recompute: R,
        remote: Option<RemoteStoreRef>,
    ) -> anyhow::Result<Self>
    where
        R: Recompute<K, V>,
    {
        config.validate()?;

        let topic: Arc<str> = Arc::from(config.topic.as_str());
        let shutdown = CancellationToken::new();
        let remote = RemoteTier::new(
            remote,
            Codec::new(&topic),
            config.remote_timeout,
            config.max_concurrent_uploads,
            config.max_upload_queue_size,
        )?;
        let chain = Arc::new(TierChain::new(remote, Clock::new(), topic));
        let loader = Loader::new(
            Arc::new(recompute),
            Arc::clone(&chain),
            &config,
            shutdown.clone(),
        );

        let cache = Self {
            inner: Arc::new(CacheInner {
                config,
                chain,
                loader,
                shutdown,
                refresher: Mutex::new(None),
            }),
        };
        if let Some(period) = cache.inner.config.refresh_interval {
            cache.start(period);
        }
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the value for `key`, computing it if neither tier has it.
    ///
    /// The remote read and the wait for a recompute share one deadline of the larger of
    /// `refresh_timeout` and `remote_timeout`. Returns `None` only if the recompute failed, did
    /// not finish in time, or the cache was stopped. The cause is logged.
    pub async fn get(&self, key: &K) -> Option<V> {
        let config = &self.inner.config;
        let topic = config.topic.as_str();
        metric!(counter("caches.access") += 1, "cache" => topic);

        let start = Instant::now();
        let budget = config.refresh_timeout.max(config.remote_timeout);
        if let Some(entry) = self.inner.chain.check(key, budget).await {
            return Some(entry.value);
        }

        let wait = budget
            .saturating_sub(start.elapsed())
            .min(config.refresh_timeout);
        match self.inner.loader.load(key, true, wait).await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    cache = topic,
                    "Failed to compute cache entry"
                );
                None
            }
        }
    }

    /// Returns the value for `key` if either tier has an unexpired entry.
    ///
    /// Never computes a value.
    pub async fn check(&self, key: &K) -> Option<V> {
        let budget = self.inner.config.remote_timeout;
        self.inner
            .chain
            .check(key, budget)
            .await
            .map(|entry| entry.value)
    }

    /// Computes the value for `key`, ignoring what the tiers hold, and publishes it.
    ///
    /// Joins a recompute of the same key that is already running.
    pub async fn refresh(&self, key: &K) -> Result<V, CacheError> {
        self.inner.refresh(key).await
    }

    /// Publishes an externally computed `value` with explicit windows.
    ///
    /// The entry is written to both tiers as if a recompute had produced it, and the remote
    /// record is kept for `expires`. Waits for the remote write, which is bounded by
    /// `remote_timeout`.
    pub async fn set_ttl(&self, key: &K, value: V, recheck: Duration, expires: Duration) {
        let entry = Entry::new(value, self.inner.chain.now(), recheck, expires);
        let done = self.inner.chain.publish(key, entry, expires);
        // dropped writes are logged by the uploader
        let _ = done.await;
    }

    /// Keys that are due for a refresh right now.
    ///
    /// Keys whose entry was already refreshed by a peer are adopted from the remote tier and
    /// left out.
    pub async fn recheck_keys(&self) -> Vec<K> {
        let now = self.inner.chain.now();
        let mut due = Vec::new();
        for key in self.inner.chain.due_keys(now) {
            if self.inner.still_due(&key, now).await {
                due.push(key);
            }
        }
        due
    }

    /// Starts, restarts or stops the background refresher.
    ///
    /// Calling this with the period of the running refresher does nothing, a different period
    /// replaces it, and a zero period stops it. Must be called from within a tokio runtime.
    pub fn start(&self, period: Duration) {
        let mut refresher = self.inner.refresher.lock();
        if let Some(current) = refresher.as_ref() {
            if current.period() == period && current.is_running() {
                return;
            }
        }
        if let Some(previous) = refresher.take() {
            previous.cancel();
        }
        if period.is_zero() {
            return;
        }

        let topic = self.inner.config.topic.as_str();
        if self.inner.shutdown.is_cancelled() {
            tracing::warn!(cache = topic, "Not starting refresher of a stopped cache");
            return;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    cache = topic,
                    "Cannot start refresher outside of a tokio runtime"
                );
                return;
            }
        };

        tracing::debug!(cache = topic, ?period, "Starting background refresher");
        *refresher = Some(Refresher::spawn(
            &runtime,
            Arc::downgrade(&self.inner),
            period,
            &self.inner.shutdown,
        ));
    }

    /// The period of the running background refresher.
    pub fn refresh_period(&self) -> Option<Duration> {
        self.inner
            .refresher
            .lock()
            .as_ref()
            .filter(|refresher| refresher.is_running())
            .map(|refresher| refresher.period())
    }

    /// Stops all background work of this cache.
    ///
    /// Cancels running recomputes and waits for the background refresher to finish. Reads keep
    /// working afterwards, but anything that needs a recompute fails with
    /// [`CacheError::Cancelled`].
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let refresher = self.inner.refresher.lock().take();
        if let Some(refresher) = refresher {
            refresher.join().await;
        }
        tracing::debug!(cache = self.inner.config.topic.as_str(), "Cache stopped");
    }
}

impl<K: CacheKey, V: CacheValue> CacheInner<K, V> {
    async fn refresh(&self, key: &K) -> Result<V, CacheError> {
        self.loader
            .load(key, false, self.config.refresh_timeout)
            .await
    }

    /// Whether `key` still needs a refresh after looking at the remote tier.
    ///
    /// A peer may have refreshed the entry since this process last saw it, in which case its
    /// entry is adopted.
    async fn still_due(&self, key: &K, now: DateTime<Utc>) -> bool {
        match self.chain.adopt_remote(key).await {
            Some(entry) if !entry.needs_recheck(now) => {
                tracing::trace!(
                    cache = self.config.topic.as_str(),
                    "Adopted entry refreshed by a peer"
                );
                false
            }
            _ => true,
        }
    }

    /// One tick of the background refresher.
    pub(crate) async fn recheck_tick(&self) {
        let topic = self.config.topic.as_str();
        let now = self.chain.now();
        let due = self.chain.due_keys(now);
        if due.is_empty() {
            return;
        }
        tracing::debug!(cache = topic, due = due.len(), "Rechecking stale keys");

        for key in due {
            if !self.still_due(&key, now).await {
                continue;
            }
            // the registry keeps the key, so a failed refresh is retried next tick
            if let Err(err) = self.refresh(&key).await {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    cache = topic,
                    "Background refresh failed"
                );
            }
        }
    }
}
