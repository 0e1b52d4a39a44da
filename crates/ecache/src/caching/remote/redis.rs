use std::fmt;
use std::time::Duration;

use anyhow::Context;
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use super::RemoteStore;
use crate::caching::Fingerprint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisRemoteStoreConfig {
    /// Connection URL, like `redis://127.0.0.1:6379/0`.
    pub url: String,
}

/// A [`RemoteStore`] backed by redis `GET` and `SET ... EX`.
///
/// Uses a [`ConnectionManager`], which multiplexes requests over one connection and reconnects
/// transparently.
#[derive(Clone)]
pub struct RedisRemoteStore {
    connection_manager: ConnectionManager,
}

impl fmt::Debug for RedisRemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRemoteStore")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisRemoteStore {
    pub async fn connect(config: &RedisRemoteStoreConfig) -> anyhow::Result<Self> {
        let client =
            redis::Client::open(config.url.as_str()).context("Failed to create redis client")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("Failed to connect to redis")?;
        tracing::debug!("Connected to redis remote store");

        Ok(Self { connection_manager })
    }
}

impl RemoteStore for RedisRemoteStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, anyhow::Result<Option<Vec<u8>>>> {
        let mut conn = self.connection_manager.clone();
        Box::pin(async move {
            redis::cmd("GET")
                .arg(fingerprint.as_str())
                .query_async::<Option<Vec<u8>>>(&mut conn)
                .await
                .context("redis GET failed")
        })
    }

    fn set<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let mut conn = self.connection_manager.clone();
        // redis rejects an expiry of zero
        let ttl_seconds = ttl.as_secs().max(1);
        Box::pin(async move {
            redis::cmd("SET")
                .arg(fingerprint.as_str())
                .arg(bytes)
                .arg("EX")
                .arg(ttl_seconds)
                .query_async::<()>(&mut conn)
                .await
                .context("redis SET failed")
        })
    }
}
