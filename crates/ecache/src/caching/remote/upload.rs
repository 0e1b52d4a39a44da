use std::sync::Arc;
use std::time::Duration;

use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::RemoteStoreRef;
use crate::caching::{CacheError, Fingerprint};

struct UploadMessage {
    fingerprint: Fingerprint,
    bytes: Vec<u8>,
    ttl: Duration,
    /// Notified once the upload has finished, successfully or not.
    done_tx: oneshot::Sender<()>,
}

/// Writes entries to the remote tier in the background.
///
/// Uploads are not critical: when more are pending than the queue holds, new ones are dropped.
#[derive(Debug, Clone)]
pub(crate) struct Uploader {
    upload_queue_tx: mpsc::Sender<UploadMessage>,
    topic: Arc<str>,
}

impl std::fmt::Debug for UploadMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadMessage")
            .field("fingerprint", &self.fingerprint)
            .field("bytes", &self.bytes.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Uploader {
    /// Spawns the upload worker on `runtime`.
    ///
    /// The worker terminates once every clone of the returned [`Uploader`] is dropped and all
    /// queued uploads are done.
    pub fn spawn(
        runtime: &Handle,
        store: RemoteStoreRef,
        timeout: Duration,
        topic: Arc<str>,
        max_concurrent_uploads: usize,
        max_upload_queue_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(max_upload_queue_size);
        runtime.spawn(
            upload_worker(
                rx,
                store,
                timeout,
                Arc::clone(&topic),
                max_concurrent_uploads,
            )
            .bind_hub(Hub::new_from_top(Hub::current())),
        );
        Self {
            upload_queue_tx: tx,
            topic,
        }
    }

    /// Queues `bytes` to be stored under `fingerprint`.
    ///
    /// The returned receiver resolves when the upload is done. It errors when the upload was
    /// dropped because the queue is full.
    pub fn store(
        &self,
        fingerprint: Fingerprint,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let topic = &*self.topic;
        metric!(
            gauge("caches.remote.uploads_queue_capacity") = self.upload_queue_tx.capacity() as u64,
            "cache" => topic,
        );
        self.upload_queue_tx
            .try_send(UploadMessage {
                fingerprint,
                bytes,
                ttl,
                done_tx,
            })
            .unwrap_or_else(|_| {
                metric!(counter("caches.remote.store.dropped") += 1, "cache" => topic);
                tracing::error!(cache = topic, "Remote tier upload queue full");
            });
        done_rx
    }
}

/// Long running task managing concurrent uploads to the remote tier.
async fn upload_worker(
    mut work_rx: mpsc::Receiver<UploadMessage>,
    store: RemoteStoreRef,
    timeout: Duration,
    topic: Arc<str>,
    max_concurrent_uploads: usize,
) {
    let (done_tx, mut done_rx) = mpsc::channel::<()>(max_concurrent_uploads);
    let mut uploads_counter = max_concurrent_uploads;
    let mut closed = false;
    loop {
        tokio::select! {
            message = work_rx.recv(), if uploads_counter > 0 && !closed => {
                let Some(message) = message else {
                    closed = true;
                    continue;
                };
                uploads_counter -= 1;
                tokio::spawn(
                    single_upload(
                        done_tx.clone(),
                        Arc::clone(&store),
                        timeout,
                        Arc::clone(&topic),
                        message,
                    )
                    .bind_hub(Hub::new_from_top(Hub::current())),
                );
                let uploads_in_flight = (max_concurrent_uploads - uploads_counter) as u64;
                metric!(
                    gauge("caches.remote.uploads_in_flight") = uploads_in_flight,
                    "cache" => &topic,
                );
            }
            Some(_) = done_rx.recv(), if uploads_counter < max_concurrent_uploads => {
                uploads_counter += 1;
            }
            else => break,
        }
    }
    tracing::debug!(cache = &*topic, "Remote tier upload worker terminated");
}

async fn single_upload(
    done_tx: mpsc::Sender<()>,
    store: RemoteStoreRef,
    timeout: Duration,
    topic: Arc<str>,
    message: UploadMessage,
) {
    let UploadMessage {
        fingerprint,
        bytes,
        ttl,
        done_tx: complete_tx,
    } = message;

    let res = match tokio::time::timeout(timeout, store.set(&fingerprint, bytes, ttl)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(CacheError::RemoteUnavailable(format!("{err:#}"))),
        Err(_) => Err(CacheError::RemoteTimeout(timeout)),
    };

    match res {
        Ok(()) => {
            tracing::trace!(%fingerprint, "Stored entry in remote tier");
            metric!(
                counter("caches.remote.store") += 1,
                "cache" => &topic,
                "backend" => store.name(),
                "status" => "ok",
            );
        }
        Err(err) => {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                %fingerprint,
                backend = store.name(),
                "Error storing to remote tier"
            );
            metric!(
                counter("caches.remote.store") += 1,
                "cache" => &topic,
                "backend" => store.name(),
                "status" => "error",
                "errdetails" => err.metrics_tag(),
            );
        }
    }

    // Tell the worker we're done, then whoever waits for this upload.
    let _ = done_tx.send(()).await;
    let _ = complete_tx.send(());
}
