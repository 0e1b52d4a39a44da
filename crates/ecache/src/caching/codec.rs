//! Wire format of entries in the remote tier and the fingerprints they are stored under.
//!
//! Entries are JSON objects with the fields `value`, `recheck_at` and `expires_at`, timestamps
//! being RFC 3339 strings in UTC. Unknown fields are ignored when reading so that newer
//! processes can add fields without breaking older peers sharing the same `topic`.
//!
//! Fingerprints have the form `ecache:<topic>:<key-text>`, where `<key-text>` is the key itself
//! if it serializes to a JSON string, and its compact JSON serialization otherwise.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{CacheError, Entry};

/// Fixed first component of every fingerprint.
pub const FINGERPRINT_PREFIX: &str = "ecache";

/// The key of an entry in the remote tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives fingerprints for one `topic` and converts entries to and from bytes.
#[derive(Debug, Clone)]
pub struct Codec {
    topic: Arc<str>,
}

impl Codec {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: Arc::from(topic),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn fingerprint<K: Serialize>(&self, key: &K) -> Result<Fingerprint, CacheError> {
        let text = key_text(key)?;
        Ok(Fingerprint(Arc::from(format!(
            "{FINGERPRINT_PREFIX}:{}:{text}",
            self.topic
        ))))
    }

    pub fn encode<V: Serialize>(&self, entry: &Entry<V>) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(entry).map_err(|err| CacheError::Encode(err.to_string()))
    }

    pub fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Entry<V>, CacheError> {
        serde_json::from_slice(bytes).map_err(|err| CacheError::Decode(err.to_string()))
    }
}

fn key_text<K: Serialize>(key: &K) -> Result<String, CacheError> {
    let text = serde_json::to_string(key).map_err(|err| CacheError::Encode(err.to_string()))?;
    if text.starts_with('"') {
        // a plain string key is used as is, without quotes and escapes
        if let Ok(s) = serde_json::from_str::<String>(&text) {
            return Ok(s);
        }
    }
    Ok(text)
}
