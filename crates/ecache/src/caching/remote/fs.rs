use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Error};
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use super::RemoteStore;
use crate::caching::Fingerprint;

/// A [`RemoteStore`] backed by a directory, typically on a network file system.
///
/// Every record is a file whose path is derived from the sha-256 hash of its fingerprint.
/// Records are written to a temporary file first and then moved into place, so readers never
/// observe partial writes. Files are never removed, expiry is left to the `expires_at` timestamp
/// inside each entry.
#[derive(Debug, Clone)]
pub struct FilesystemRemoteStore {
    path: PathBuf,
}

impl FilesystemRemoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path of the record for `fingerprint`, formatted like `aa/bbccdd/eeff...`.
    fn record_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let hash = Sha256::digest(fingerprint.as_str().as_bytes());
        let hex = |bytes: &[u8]| bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
        self.path
            .join(hex(&hash[..1]))
            .join(hex(&hash[1..4]))
            .join(hex(&hash[4..]))
    }

    async fn read(&self, fingerprint: &Fingerprint) -> anyhow::Result<Option<Vec<u8>>> {
        let abspath = self.record_path(fingerprint);
        tracing::trace!("Reading remote record from {}", abspath.display());
        match fs::read(&abspath).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context("Failed to read file in remote store"),
        }
    }

    async fn write(&self, fingerprint: &Fingerprint, bytes: Vec<u8>) -> anyhow::Result<()> {
        let abspath = self.record_path(fingerprint);
        let parent_dir = abspath
            .parent()
            .ok_or_else(|| Error::msg("Remote store directory not found"))?;
        fs::create_dir_all(parent_dir)
            .await
            .context("Failed to create parent directories")?;

        let temp_dir = self.path.join(".tmp");
        fs::create_dir_all(&temp_dir)
            .await
            .context("failed to create tempdir")?;
        let temp_file = NamedTempFile::new_in(&temp_dir).context("failed to create tempfile")?;
        let dup_file = temp_file.reopen().context("failed to dup filedescriptor")?;
        let mut dest = File::from_std(dup_file);

        dest.write_all(&bytes)
            .await
            .context("Failed to write data into file")?;
        dest.flush().await.context("Failed to flush file")?;

        temp_file
            .persist(&abspath)
            .context("Failed to save file in remote store")?;
        Ok(())
    }
}

impl RemoteStore for FilesystemRemoteStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn get<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, anyhow::Result<Option<Vec<u8>>>> {
        Box::pin(self.read(fingerprint))
    }

    fn set<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        bytes: Vec<u8>,
        _ttl: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.write(fingerprint, bytes))
    }
}
