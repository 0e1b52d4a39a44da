use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::clock::Clock;
use super::local::State;
use super::remote::RemoteTier;
use super::{CacheKey, CacheValue, Entry};

/// The local and remote tier, read in that order.
///
/// The local tier and the key registry live behind one mutex. It is only ever taken for short,
/// synchronous sections and never held across an `.await`.
#[derive(Debug)]
pub(crate) struct TierChain<K, V> {
    state: Mutex<State<K, V>>,
    remote: RemoteTier,
    clock: Clock,
    topic: Arc<str>,
}

impl<K: CacheKey, V: CacheValue> TierChain<K, V> {
    pub fn new(remote: RemoteTier, clock: Clock, topic: Arc<str>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            remote,
            clock,
            topic,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Looks up `key` in the local tier, then in the remote tier.
    ///
    /// The remote call waits at most `budget` or the remote timeout, whichever is shorter. A
    /// remote hit warms the local tier. Every hit is recorded in the registry.
    pub async fn check(&self, key: &K, budget: Duration) -> Option<Entry<V>> {
        if let Some(entry) = self.lookup_local(key) {
            return Some(entry);
        }

        let entry = self
            .adopt_remote_within(key, budget.min(self.remote.timeout()))
            .await?;
        metric!(counter("caches.remote.hit") += 1, "cache" => &self.topic);
        Some(entry)
    }

    /// Looks up `key` in the local tier only.
    pub fn lookup_local(&self, key: &K) -> Option<Entry<V>> {
        let entry = self.state.lock().lookup(key, self.now())?;
        tracing::trace!(cache = &*self.topic, "Local tier hit");
        metric!(counter("caches.local.hit") += 1, "cache" => &self.topic);
        Some(entry)
    }

    /// Reads `key` from the remote tier only and stores a hit locally.
    pub async fn adopt_remote(&self, key: &K) -> Option<Entry<V>> {
        self.adopt_remote_within(key, self.remote.timeout()).await
    }

    async fn adopt_remote_within(&self, key: &K, timeout: Duration) -> Option<Entry<V>> {
        let entry = self.remote.get(key, self.now(), timeout).await?;
        // the clock moved while the remote call was pending
        let kept = self.state.lock().warm(key, entry, self.now());
        self.report_registry_size();
        Some(kept)
    }

    /// Stores `entry` in the local tier and queues it for the remote tier.
    ///
    /// The returned receiver resolves once the remote write is done.
    pub fn publish(&self, key: &K, entry: Entry<V>, ttl: Duration) -> oneshot::Receiver<()> {
        let done = self.remote.store(key, &entry, ttl);
        self.state.lock().publish(key, entry);
        self.report_registry_size();
        done
    }

    /// Keys whose recheck time has passed at `now`.
    pub fn due_keys(&self, now: DateTime<Utc>) -> Vec<K> {
        self.state.lock().registry.due(now)
    }

    pub fn registry_len(&self) -> usize {
        self.state.lock().registry.len()
    }

    fn report_registry_size(&self) {
        let size = self.registry_len() as u64;
        metric!(gauge("caches.registry.size") = size, "cache" => &self.topic);
    }
}
