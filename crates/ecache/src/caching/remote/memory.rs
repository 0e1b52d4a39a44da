use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::RemoteStore;
use crate::caching::Fingerprint;

#[derive(Debug)]
struct Record {
    bytes: Vec<u8>,
    deadline: Option<Instant>,
}

/// A [`RemoteStore`] living in process memory.
///
/// Share one instance between several caches (in an `Arc`) to have them cooperate as if they
/// were separate processes talking to the same remote store. Records are dropped lazily once
/// their TTL has passed.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    records: Mutex<HashMap<Fingerprint, Record>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, including ones whose TTL has passed but were not yet read.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Stores raw bytes without a TTL, bypassing the entry codec.
    pub fn insert_raw(&self, fingerprint: &Fingerprint, bytes: Vec<u8>) {
        self.records.lock().insert(
            fingerprint.clone(),
            Record {
                bytes,
                deadline: None,
            },
        );
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, anyhow::Result<Option<Vec<u8>>>> {
        let mut records = self.records.lock();
        let expired = records
            .get(fingerprint)
            .and_then(|record| record.deadline)
            .is_some_and(|deadline| deadline <= Instant::now());
        let bytes = if expired {
            records.remove(fingerprint);
            None
        } else {
            records.get(fingerprint).map(|record| record.bytes.clone())
        };
        Box::pin(async move { Ok(bytes) })
    }

    fn set<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let deadline = Instant::now().checked_add(ttl);
        self.records
            .lock()
            .insert(fingerprint.clone(), Record { bytes, deadline });
        Box::pin(async { Ok(()) })
    }
}
