//! A two-tier refresh-ahead cache.
//!
//! `ecache` sits in front of computations that are expensive to redo but cheap to share. Values
//! are kept in an in-process tier and in a remote tier shared by every process working on the
//! same `topic`. Entries carry two deadlines: after `recheck_at` they are due for a background
//! refresh, after `expires_at` they are never served again.
//!
//! See the [`caching`] module for how reads, refreshes and the background refresher interact.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
mod utils;

pub use caching::{
    CacheError, CacheKey, CacheValue, Entry, Fingerprint, Recompute, RefreshCache, RemoteStore,
    RemoteStoreRef,
};
pub use config::{CacheConfig, Config};
