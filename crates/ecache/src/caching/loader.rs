use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::chain::TierChain;
use super::{CacheError, CacheKey, CacheValue, Entry};
use crate::config::CacheConfig;
use crate::utils::CallOnDrop;

/// Computes the value for a key.
///
/// This is implemented for every `Fn(CancellationToken, K) -> impl Future<Output =
/// anyhow::Result<V>>`, so a closure is usually all that is needed. The token is cancelled when
/// the cache is stopped or dropped; long running computations should watch it.
pub trait Recompute<K, V>: Send + Sync + 'static {
    fn recompute(&self, cancel: CancellationToken, key: K)
    -> BoxFuture<'static, anyhow::Result<V>>;
}

impl<K, V, F, Fut> Recompute<K, V> for F
where
    F: Fn(CancellationToken, K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    fn recompute(
        &self,
        cancel: CancellationToken,
        key: K,
    ) -> BoxFuture<'static, anyhow::Result<V>> {
        self(cancel, key).boxed()
    }
}

type Computation<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// Runs recomputes, at most one per key at a time, and publishes their results.
///
/// Each recompute is spawned as its own task which publishes the value to the tiers before it
/// stops counting as in flight. Callers only wait for it, so a caller that times out or is
/// dropped does not abort the recompute, and the next caller for the same key either attaches
/// to the still running one or finds its result in the local tier.
pub(crate) struct Loader<K, V> {
    recompute: Arc<dyn Recompute<K, V>>,
    chain: Arc<TierChain<K, V>>,
    inflight: Arc<Mutex<HashMap<K, Computation<V>>>>,
    recheck: Duration,
    expires: Duration,
    shutdown: CancellationToken,
    topic: Arc<str>,
}

impl<K: CacheKey, V: CacheValue> Loader<K, V> {
    pub fn new(
        recompute: Arc<dyn Recompute<K, V>>,
        chain: Arc<TierChain<K, V>>,
        config: &CacheConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            recompute,
            chain,
            inflight: Default::default(),
            recheck: config.recheck,
            expires: config.expires,
            shutdown,
            topic: Arc::from(config.topic.as_str()),
        }
    }

    /// Waits up to `wait` for the value of `key`.
    ///
    /// With `reuse_local`, a value that landed in the local tier since the caller last looked is
    /// returned instead of starting a new recompute. A running recompute is always joined.
    pub async fn load(&self, key: &K, reuse_local: bool, wait: Duration) -> Result<V, CacheError> {
        if self.shutdown.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let computation = self.computation(key, reuse_local);
        match tokio::time::timeout(wait, computation).await {
            Ok(res) => res,
            Err(_) => Err(CacheError::RefreshTimeout(wait)),
        }
    }

    /// Number of recomputes currently running.
    #[cfg(test)]
    pub fn inflight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Returns the running recompute for `key`, or spawns a new one.
    ///
    /// The local tier is consulted while the in-flight map is locked. A finished recompute
    /// publishes locally before it leaves the map, so one of the two always sees it.
    fn computation(&self, key: &K, reuse_local: bool) -> Computation<V> {
        let mut inflight = self.inflight.lock();
        if let Some(computation) = inflight.get(key) {
            return computation.clone();
        }
        if reuse_local {
            if let Some(entry) = self.chain.lookup_local(key) {
                return futures::future::ready(Ok(entry.value)).boxed().shared();
            }
        }

        metric!(counter("caches.computation") += 1, "cache" => &self.topic);

        let done_token = {
            let key = key.clone();
            let inflight = Arc::clone(&self.inflight);
            CallOnDrop::new(move || {
                inflight.lock().remove(&key);
            })
        };

        let recompute = Arc::clone(&self.recompute);
        let chain = Arc::clone(&self.chain);
        let cancel = self.shutdown.clone();
        let (recheck, expires) = (self.recheck, self.expires);
        let topic = Arc::clone(&self.topic);
        let owned_key = key.clone();
        let task = async move {
            let _done_token = done_token;
            let start = Instant::now();

            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CacheError::Cancelled),
                res = recompute.recompute(cancel.clone(), owned_key.clone()) => {
                    res.map_err(CacheError::refresh_failed)
                }
            };

            metric!(
                timer("caches.computation.duration") = start.elapsed(),
                "cache" => &topic,
            );
            match &res {
                Ok(value) => {
                    let entry = Entry::new(value.clone(), chain.now(), recheck, expires);
                    // the remote write finishes in the background
                    let _ = chain.publish(&owned_key, entry, expires);
                    metric!(counter("caches.refresh") += 1, "cache" => &topic, "status" => "ok");
                }
                Err(err) => {
                    metric!(
                        counter("caches.refresh") += 1,
                        "cache" => &topic,
                        "status" => "error",
                        "errdetails" => err.metrics_tag(),
                    );
                }
            }
            res
        };
        let handle = tokio::spawn(task.bind_hub(Hub::new_from_top(Hub::current())));

        let computation = async move {
            match handle.await {
                Ok(res) => res,
                Err(err) => Err(CacheError::refresh_failed(
                    anyhow::Error::new(err).context("recompute task failed"),
                )),
            }
        }
        .boxed()
        .shared();

        inflight.insert(key.clone(), computation.clone());
        computation
    }
}
