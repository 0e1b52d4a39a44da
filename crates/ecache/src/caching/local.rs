use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};

use super::Entry;
use super::entry::needs_recheck;

/// The in-process tier.
///
/// Expired rows are never returned, but they are also not removed. They act as tombstones until
/// the key is written again.
#[derive(Debug)]
pub struct LocalTier<K, V> {
    entries: HashMap<K, Entry<V>>,
}

impl<K, V> Default for LocalTier<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Clone> LocalTier<K, V> {
    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<Entry<V>> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .cloned()
    }

    pub fn set(&mut self, key: K, entry: Entry<V>) {
        self.entries.insert(key, entry);
    }

    /// Number of rows, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deadlines {
    recheck_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// All keys this process has seen, together with their deadlines.
///
/// The registry only ever grows. Keys are recorded on every hit and on every successful refresh,
/// and it is what the background refresher walks on each tick.
#[derive(Debug)]
pub struct Registry<K> {
    keys: HashMap<K, Deadlines>,
}

impl<K> Default for Registry<K> {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> Registry<K> {
    pub fn record<V>(&mut self, key: &K, entry: &Entry<V>) {
        let deadlines = Deadlines {
            recheck_at: entry.recheck_at,
            expires_at: entry.expires_at,
        };
        match self.keys.get_mut(key) {
            Some(existing) => *existing = deadlines,
            None => {
                self.keys.insert(key.clone(), deadlines);
            }
        }
    }

    /// Keys whose recheck time has passed at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<K> {
        self.keys
            .iter()
            .filter(|(_, d)| needs_recheck(d.recheck_at, d.expires_at, now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn recheck_at(&self, key: &K) -> Option<DateTime<Utc>> {
        self.keys.get(key).map(|d| d.recheck_at)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Everything guarded by the instance mutex.
#[derive(Debug)]
pub(crate) struct State<K, V> {
    pub local: LocalTier<K, V>,
    pub registry: Registry<K>,
}

impl<K, V> Default for State<K, V> {
    fn default() -> Self {
        Self {
            local: LocalTier::default(),
            registry: Registry::default(),
        }
    }
}

impl<K: Clone + Eq + Hash, V: Clone> State<K, V> {
    /// Reads the local tier, recording a hit in the registry.
    pub fn lookup(&mut self, key: &K, now: DateTime<Utc>) -> Option<Entry<V>> {
        let entry = self.local.get(key, now)?;
        self.registry.record(key, &entry);
        Some(entry)
    }

    /// Stores a freshly computed or externally provided entry.
    pub fn publish(&mut self, key: &K, entry: Entry<V>) {
        self.registry.record(key, &entry);
        self.local.set(key.clone(), entry);
    }

    /// Stores an entry read from the remote tier.
    ///
    /// A remote entry never replaces a local one that lives longer, which happens when this
    /// process published while the remote read was in flight. Returns the entry that was kept.
    pub fn warm(&mut self, key: &K, entry: Entry<V>, now: DateTime<Utc>) -> Entry<V> {
        let kept = match self.local.get(key, now) {
            Some(current) if current.expires_at > entry.expires_at => current,
            _ => {
                self.local.set(key.clone(), entry.clone());
                entry
            }
        };
        self.registry.record(key, &kept);
        kept
    }
}
