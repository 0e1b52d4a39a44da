use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use ecache::caching::codec::Fingerprint;
use ecache::caching::remote::MemoryRemoteStore;
use ecache::{CacheConfig, Recompute, RefreshCache, RemoteStore, RemoteStoreRef};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// A recompute function that counts its invocations.
///
/// The value for key `k` computed by the n-th invocation is `k@n`.
#[derive(Clone, Debug, Default)]
pub struct Upstream {
    computations: Arc<AtomicUsize>,
    delay_ms: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl Upstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        let upstream = Self::default();
        upstream.set_delay(delay);
        upstream
    }

    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Recompute<String, String> for Upstream {
    fn recompute(
        &self,
        _cancel: CancellationToken,
        key: String,
    ) -> BoxFuture<'static, anyhow::Result<String>> {
        let n = self.computations.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        let failing = self.failing.load(Ordering::SeqCst);

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if failing {
                anyhow::bail!("upstream unavailable");
            }
            Ok(format!("{key}@{n}"))
        })
    }
}

pub fn config(recheck: Duration, expires: Duration) -> CacheConfig {
    CacheConfig {
        recheck,
        expires,
        ..CacheConfig::new("integration")
    }
}

pub fn cache(
    config: CacheConfig,
    upstream: &Upstream,
    remote: Option<RemoteStoreRef>,
) -> RefreshCache<String, String> {
    RefreshCache::new(config, upstream.clone(), remote).unwrap()
}

pub fn key(k: &str) -> String {
    k.to_owned()
}

/// A remote store that fails every call.
#[derive(Debug, Default)]
pub struct FailingStore {
    pub calls: AtomicUsize,
}

impl RemoteStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn get<'a>(
        &'a self,
        _fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, anyhow::Result<Option<Vec<u8>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(anyhow::anyhow!("connection reset by peer")) })
    }

    fn set<'a>(
        &'a self,
        _fingerprint: &'a Fingerprint,
        _bytes: Vec<u8>,
        _ttl: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(anyhow::anyhow!("connection reset by peer")) })
    }
}

/// A remote store that never answers.
#[derive(Debug, Default)]
pub struct HangingStore;

impl RemoteStore for HangingStore {
    fn name(&self) -> &'static str {
        "hanging"
    }

    fn get<'a>(
        &'a self,
        _fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, anyhow::Result<Option<Vec<u8>>>> {
        Box::pin(futures::future::pending())
    }

    fn set<'a>(
        &'a self,
        _fingerprint: &'a Fingerprint,
        _bytes: Vec<u8>,
        _ttl: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(futures::future::pending())
    }
}

/// A shared in-memory store whose reads answer late.
///
/// Reads look at the store right away and only then wait, like a slow network.
#[derive(Debug)]
pub struct SlowStore {
    inner: MemoryRemoteStore,
    latency: Duration,
}

impl SlowStore {
    pub fn new(latency: Duration) -> Self {
        Self {
            inner: MemoryRemoteStore::new(),
            latency,
        }
    }
}

impl RemoteStore for SlowStore {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn get<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, anyhow::Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            let res = self.inner.get(fingerprint).await;
            tokio::time::sleep(self.latency).await;
            res
        })
    }

    fn set<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        self.inner.set(fingerprint, bytes, ttl)
    }
}

/// Lets queued remote tier writes finish.
///
/// With a paused clock, the sleep only fires once every other task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
