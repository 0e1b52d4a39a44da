use std::sync::Weak;
use std::time::Duration;

use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::cache::CacheInner;
use super::{CacheKey, CacheValue};

/// A running background refresher.
#[derive(Debug)]
pub(crate) struct Refresher {
    period: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Refresher {
    /// Spawns a refresher ticking every `period`.
    ///
    /// The first tick happens one `period` from now. The task ends when `shutdown` is cancelled
    /// or when the cache is gone.
    pub fn spawn<K: CacheKey, V: CacheValue>(
        runtime: &Handle,
        cache: Weak<CacheInner<K, V>>,
        period: Duration,
        shutdown: &CancellationToken,
    ) -> Self {
        let cancel = shutdown.child_token();
        let task = run(cache, period, cancel.clone());
        let task = runtime.spawn(task.bind_hub(Hub::new_from_top(Hub::current())));
        Self {
            period,
            cancel,
            task,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Stops the refresher without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stops the refresher and waits until a tick in progress has been abandoned.
    pub async fn join(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if err.is_panic() {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "Background refresher panicked"
                );
            }
        }
    }
}

async fn run<K: CacheKey, V: CacheValue>(
    cache: Weak<CacheInner<K, V>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        // only hold on to the cache for the duration of a tick
        let Some(cache) = cache.upgrade() else {
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = cache.recheck_tick() => {}
        }
    }

    tracing::debug!("Background refresher terminated");
}
