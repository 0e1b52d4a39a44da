//! # Refresh-ahead caching
//!
//! A [`RefreshCache`] sits in front of a recompute function that is expensive to run but whose
//! results are cheap to share among a fleet of cooperating processes.
//!
//! ## Cache Layers
//!
//! - A local tier in process memory, guarded together with the key registry by one mutex that
//!   is never held across an `.await`.
//! - An optional remote tier, a [`RemoteStore`] shared by all processes that use the same
//!   `topic`. Entries are stored as JSON under a [`Fingerprint`] of the form
//!   `ecache:<topic>:<key-text>`. The remote tier is best effort: failures and timeouts are
//!   logged and treated as misses.
//!
//! A [`RefreshCache::get`] goes through the following steps:
//! - First, it looks at the local tier.
//! - On miss, it tries the remote tier, and a hit there warms the local tier.
//! - On miss, it runs the recompute function, and the recompute publishes its result to both
//!   tiers. Remote writes are queued and done in the background.
//!
//! The remote read and the wait for the recompute share one deadline, the larger of
//! `refresh_timeout` and `remote_timeout`.
//!
//! Concurrent misses of the same key within one process share a single recompute. A recompute
//! keeps running when its callers time out, and the next caller for that key picks up its
//! result.
//!
//! ## Freshness
//!
//! Every [`Entry`] has a `recheck_at` and an `expires_at` deadline. Entries past `recheck_at` are
//! still served but are due for a refresh, entries past `expires_at` are never served.
//!
//! Every key that was hit or computed is remembered in a registry. The background refresher,
//! enabled with [`RefreshCache::start`], periodically walks the registry and recomputes all due
//! keys one after the other. Before recomputing, it checks the remote tier, so that an entry
//! already refreshed by another process is adopted instead of being computed again.
//!
//! ### Metrics
//!
//! All metrics are tagged with a `cache` field holding the topic:
//!
//! - `caches.access`: All calls to `get`.
//! - `caches.local.hit`: Lookups served by the local tier.
//! - `caches.remote.hit`: Lookups served by the remote tier.
//! - `caches.remote.fetch` / `caches.remote.store`: Remote tier calls, with `status` and
//!   `errdetails` tags.
//! - `caches.remote.store.dropped`: Remote writes dropped because the upload queue was full.
//! - `caches.remote.uploads_in_flight` / `caches.remote.uploads_queue_capacity`: State of the
//!   background writer.
//! - `caches.computation`: Recomputes actually started, not joined.
//! - `caches.computation.duration`: How long recomputes took.
//! - `caches.refresh`: Finished refreshes, with a `status` tag.
//! - `caches.registry.size`: Number of keys known to the registry.

use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

mod cache;
mod chain;
mod clock;
pub mod codec;
mod entry;
mod error;
pub mod local;
mod loader;
mod refresher;
pub mod remote;

pub use cache::RefreshCache;
pub use codec::Fingerprint;
pub use entry::Entry;
pub use error::CacheError;
pub use loader::Recompute;
pub use remote::{RemoteStore, RemoteStoreRef};

/// Types usable as cache keys.
pub trait CacheKey: Clone + Eq + Hash + Serialize + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Clone + Eq + Hash + Serialize + Send + Sync + 'static {}

/// Types usable as cached values.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}
