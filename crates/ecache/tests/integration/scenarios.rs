use std::sync::Arc;
use std::time::Duration;

use ecache::caching::remote::MemoryRemoteStore;
use ecache::{CacheConfig, CacheError};
use tokio::time::Instant;

use crate::utils::{HangingStore, SlowStore, Upstream, cache, config, key, settle};

#[tokio::test(start_paused = true)]
async fn test_get_computes_once() {
    ecache_test::setup();
    let upstream = Upstream::new();
    let cache = cache(CacheConfig::new("integration"), &upstream, None);

    assert_eq!(cache.get(&key("k")).await.as_deref(), Some("k@1"));
    assert_eq!(cache.check(&key("k")).await.as_deref(), Some("k@1"));
    assert_eq!(cache.get(&key("k")).await.as_deref(), Some("k@1"));

    assert_eq!(upstream.computations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_check_never_computes() {
    ecache_test::setup();
    let upstream = Upstream::new();
    let cache = cache(CacheConfig::new("integration"), &upstream, None);

    assert_eq!(cache.check(&key("k")).await, None);
    assert_eq!(upstream.computations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entries_are_recomputed() {
    ecache_test::setup();
    let upstream = Upstream::new();
    let cache = cache(
        config(Duration::from_secs(5), Duration::from_secs(10)),
        &upstream,
        None,
    );

    assert_eq!(cache.get(&key("k")).await.as_deref(), Some("k@1"));

    // stale, but still served
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(cache.check(&key("k")).await.as_deref(), Some("k@1"));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(cache.check(&key("k")).await, None);
    assert_eq!(cache.get(&key("k")).await.as_deref(), Some("k@2"));
    assert_eq!(upstream.computations(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_share_one_computation() {
    ecache_test::setup();
    let upstream = Upstream::with_delay(Duration::from_millis(100));
    let cache = cache(CacheConfig::new("integration"), &upstream, None);
    let k = key("k");

    let results = futures::future::join_all((0..10).map(|_| cache.get(&k))).await;

    assert!(results.iter().all(|v| v.as_deref() == Some("k@1")));
    assert_eq!(upstream.computations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_recompute_is_not_abandoned() {
    ecache_test::setup();
    let upstream = Upstream::with_delay(Duration::from_millis(2500));
    let cache = cache(CacheConfig::new("integration"), &upstream, None);
    let k = key("k");

    // t = 0s, times out at t = 1s
    assert_eq!(cache.get(&k).await, None);
    // t = 1s, joins the running recompute and times out at t = 2s
    assert_eq!(cache.get(&k).await, None);
    // t = 2s, the recompute finishes at t = 2.5s
    assert_eq!(cache.get(&k).await.as_deref(), Some("k@1"));

    assert_eq!(upstream.computations(), 1);
    assert_eq!(cache.check(&k).await.as_deref(), Some("k@1"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_surfaces_errors() {
    ecache_test::setup();
    let upstream = Upstream::new();
    let cache = cache(CacheConfig::new("integration"), &upstream, None);
    let k = key("k");

    upstream.set_failing(true);
    let err = cache.refresh(&k).await.unwrap_err();
    assert!(matches!(err, CacheError::RefreshFailed(_)));
    assert_eq!(err.to_string(), "refresh failed: upstream unavailable");
    assert_eq!(cache.get(&k).await, None);
    // failures are not cached
    assert_eq!(cache.check(&k).await, None);

    upstream.set_failing(false);
    upstream.set_delay(Duration::from_millis(1500));
    let err = cache.refresh(&k).await.unwrap_err();
    assert!(matches!(err, CacheError::RefreshTimeout(d) if d == Duration::from_secs(1)));

    upstream.set_delay(Duration::ZERO);
    // joins the recompute still running from the timed out call
    assert_eq!(cache.refresh(&k).await.unwrap(), "k@3");
    assert_eq!(cache.get(&k).await.as_deref(), Some("k@3"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_replaces_fresh_value() {
    ecache_test::setup();
    let upstream = Upstream::new();
    let cache = cache(CacheConfig::new("integration"), &upstream, None);
    let k = key("k");

    assert_eq!(cache.get(&k).await.as_deref(), Some("k@1"));
    assert_eq!(cache.refresh(&k).await.unwrap(), "k@2");
    assert_eq!(cache.check(&k).await.as_deref(), Some("k@2"));
}

#[tokio::test(start_paused = true)]
async fn test_long_refresh_timeout_waits_for_value() {
    ecache_test::setup();
    let upstream = Upstream::with_delay(Duration::from_secs(2));
    let cfg = CacheConfig {
        refresh_timeout: Duration::from_secs(10),
        ..CacheConfig::new("integration")
    };
    let cache = cache(cfg, &upstream, None);

    let start = Instant::now();
    assert_eq!(cache.get(&key("k")).await.as_deref(), Some("k@1"));
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_with_slow_remote() {
    ecache_test::setup();
    let upstream = Upstream::with_delay(Duration::from_millis(100));
    let store = Arc::new(SlowStore::new(Duration::from_millis(200)));
    let cache = cache(CacheConfig::new("integration"), &upstream, Some(store));
    let k = key("k");

    // the second caller misses both tiers while the first one's value is being published
    let first = cache.get(&k);
    let second = async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        cache.get(&k).await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.as_deref(), Some("k@1"));
    assert_eq!(second.as_deref(), Some("k@1"));
    assert_eq!(upstream.computations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_is_bounded_with_slow_remote_and_upstream() {
    ecache_test::setup();
    let upstream = Upstream::with_delay(Duration::from_millis(900));
    let cfg = CacheConfig::new("integration");
    let bound = cfg.refresh_timeout.max(cfg.remote_timeout);
    let cache = cache(cfg, &upstream, Some(Arc::new(HangingStore)));
    let k = key("k");

    let start = Instant::now();
    assert_eq!(cache.get(&k).await, None);
    assert!(start.elapsed() <= bound);

    // the recompute kept running and published its value
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(cache.check(&k).await.as_deref(), Some("k@1"));
    assert_eq!(upstream.computations(), 1);

    let start = Instant::now();
    assert_eq!(cache.refresh(&k).await.unwrap(), "k@2");
    assert!(start.elapsed() <= bound);
}

#[tokio::test(start_paused = true)]
async fn test_peers_share_computed_values() {
    ecache_test::setup();
    let store = Arc::new(MemoryRemoteStore::new());
    let upstream_a = Upstream::new();
    let upstream_b = Upstream::new();
    let a = cache(CacheConfig::new("integration"), &upstream_a, Some(store.clone()));
    let b = cache(CacheConfig::new("integration"), &upstream_b, Some(store.clone()));

    assert_eq!(a.get(&key("k")).await.as_deref(), Some("k@1"));
    settle().await;
    assert_eq!(b.get(&key("k")).await.as_deref(), Some("k@1"));
    assert_eq!(b.check(&key("k")).await.as_deref(), Some("k@1"));

    assert_eq!(upstream_a.computations(), 1);
    assert_eq!(upstream_b.computations(), 0);

    // different topics never see each other's entries
    let upstream_c = Upstream::new();
    let c = cache(CacheConfig::new("other"), &upstream_c, Some(store));
    assert_eq!(c.check(&key("k")).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_set_ttl_is_visible_to_peers() {
    ecache_test::setup();
    let store = Arc::new(MemoryRemoteStore::new());
    let upstream = Upstream::new();
    let a = cache(CacheConfig::new("integration"), &upstream, Some(store.clone()));
    let b = cache(CacheConfig::new("integration"), &upstream, Some(store));

    a.set_ttl(
        &key("k"),
        "manual".to_owned(),
        Duration::from_secs(10),
        Duration::from_secs(60),
    )
    .await;

    assert_eq!(a.check(&key("k")).await.as_deref(), Some("manual"));
    assert_eq!(b.get(&key("k")).await.as_deref(), Some("manual"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(b.check(&key("k")).await, None);
    assert_eq!(upstream.computations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_topic_is_rejected() {
    let upstream = Upstream::new();
    let res = ecache::RefreshCache::<String, String>::new(CacheConfig::new(" "), upstream, None);
    assert!(res.is_err());
}
