use std::sync::Arc;
use std::time::Duration;

use ecache::CacheConfig;
use ecache::caching::remote::MemoryRemoteStore;

use crate::utils::{Upstream, cache, config, key, settle};

#[tokio::test(start_paused = true)]
async fn test_background_refresh_of_stale_keys() {
    ecache_test::setup();
    let upstream = Upstream::new();
    let cache = cache(
        config(Duration::from_secs(10), Duration::from_secs(60)),
        &upstream,
        None,
    );
    cache.start(Duration::from_secs(3));

    assert_eq!(cache.get(&key("a")).await.as_deref(), Some("a@1"));

    // not yet due at the ticks at t = 3s, 6s and 9s
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(upstream.computations(), 1);

    // refreshed at t = 12s
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(upstream.computations(), 2);
    assert_eq!(cache.check(&key("a")).await.as_deref(), Some("a@2"));

    // the refreshed entry is fresh again, nothing to do until t = 22s
    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(upstream.computations(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_background_refresh_is_retried() {
    ecache_test::setup();
    let upstream = Upstream::new();
    let cache = cache(
        config(Duration::from_secs(10), Duration::from_secs(60)),
        &upstream,
        None,
    );
    cache.start(Duration::from_secs(5));

    assert_eq!(cache.get(&key("a")).await.as_deref(), Some("a@1"));

    upstream.set_failing(true);
    // fails at t = 10s and t = 15s
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(upstream.computations(), 3);
    // the stale value is still served
    assert_eq!(cache.check(&key("a")).await.as_deref(), Some("a@1"));

    upstream.set_failing(false);
    // succeeds at t = 20s
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(upstream.computations(), 4);
    assert_eq!(cache.check(&key("a")).await.as_deref(), Some("a@4"));
}

#[tokio::test(start_paused = true)]
async fn test_recheck_equal_to_expiry_disables_refresh() {
    ecache_test::setup();
    let upstream = Upstream::new();
    let cache = cache(CacheConfig::new("integration"), &upstream, None);
    cache.start(Duration::from_secs(60));

    assert_eq!(cache.get(&key("a")).await.as_deref(), Some("a@1"));
    assert!(cache.recheck_keys().await.is_empty());

    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert!(cache.recheck_keys().await.is_empty());
    assert_eq!(cache.check(&key("a")).await, None);
    assert_eq!(upstream.computations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_peer_refresh_is_adopted() {
    ecache_test::setup();
    let store = Arc::new(MemoryRemoteStore::new());
    let upstream_a = Upstream::new();
    let upstream_b = Upstream::new();
    let cfg = config(Duration::from_secs(10), Duration::from_secs(60));
    let a = cache(cfg.clone(), &upstream_a, Some(store.clone()));
    let b = cache(cfg, &upstream_b, Some(store));

    assert_eq!(a.get(&key("k")).await.as_deref(), Some("k@1"));
    settle().await;
    assert_eq!(b.get(&key("k")).await.as_deref(), Some("k@1"));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(a.recheck_keys().await, vec![key("k")]);

    // `a` refreshes first, `b` sees that and does not need to recompute
    assert_eq!(a.refresh(&key("k")).await.unwrap(), "k@2");
    settle().await;
    assert!(b.recheck_keys().await.is_empty());
    assert_eq!(b.check(&key("k")).await.as_deref(), Some("k@2"));

    assert_eq!(upstream_a.computations(), 2);
    assert_eq!(upstream_b.computations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresher_adopts_instead_of_recomputing() {
    ecache_test::setup();
    let store = Arc::new(MemoryRemoteStore::new());
    let upstream_a = Upstream::new();
    let upstream_b = Upstream::new();
    let cfg = config(Duration::from_secs(10), Duration::from_secs(60));
    let a = cache(cfg.clone(), &upstream_a, Some(store.clone()));
    let b = cache(cfg, &upstream_b, Some(store));

    assert_eq!(a.get(&key("k")).await.as_deref(), Some("k@1"));
    settle().await;
    assert_eq!(b.get(&key("k")).await.as_deref(), Some("k@1"));

    // `a` ticks at t = 10s, before `b` at t = 12s
    a.start(Duration::from_secs(5));
    b.start(Duration::from_secs(6));

    tokio::time::sleep(Duration::from_secs(13)).await;
    assert_eq!(upstream_a.computations(), 2);
    assert_eq!(upstream_b.computations(), 0);
    assert_eq!(b.check(&key("k")).await.as_deref(), Some("k@2"));
}
