use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[cfg(feature = "redis")]
use super::{RedisRemoteStore, RedisRemoteStoreConfig};
use super::{FilesystemRemoteStore, MemoryRemoteStore, RemoteStoreRef};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemRemoteStoreConfig {
    pub path: PathBuf,
}

/// The backend to use for the remote tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStoreConfig {
    #[cfg(feature = "redis")]
    Redis(RedisRemoteStoreConfig),
    Filesystem(FilesystemRemoteStoreConfig),
    /// A store private to this process, only useful for tests and single-process setups.
    Memory,
}

impl RemoteStoreConfig {
    /// Creates the configured store.
    pub async fn build(&self) -> anyhow::Result<RemoteStoreRef> {
        Ok(match self {
            #[cfg(feature = "redis")]
            Self::Redis(cfg) => Arc::new(RedisRemoteStore::connect(cfg).await?),
            Self::Filesystem(cfg) => Arc::new(FilesystemRemoteStore::new(&cfg.path)),
            Self::Memory => Arc::new(MemoryRemoteStore::new()),
        })
    }
}
