use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::caching::remote::RemoteStoreConfig;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for ecache.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "ecache".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Configuration of a single [`RefreshCache`](crate::RefreshCache).
///
/// Only `topic` is required. All durations are given in humantime format, like `90s` or `1h`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct CacheConfig {
    /// Namespace of the cache in the remote tier.
    ///
    /// All processes that should share entries must use the same topic, and caches holding
    /// different data must not.
    pub topic: String,

    /// Time after which an entry is due for a background refresh.
    #[serde(default = "default_window", with = "humantime_serde")]
    pub recheck: Duration,

    /// Time after which an entry is never served again.
    #[serde(default = "default_window", with = "humantime_serde")]
    pub expires: Duration,

    /// How long a caller waits for a recompute.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub refresh_timeout: Duration,

    /// How long a single remote tier call may take.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub remote_timeout: Duration,

    /// Period of the background refresher, started right away when set.
    #[serde(default, with = "humantime_serde")]
    pub refresh_interval: Option<Duration>,

    /// Maximum number of concurrent writes to the remote tier.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Maximum number of remote tier writes waiting to be started.
    ///
    /// Writes beyond this are dropped.
    #[serde(default = "default_max_upload_queue_size")]
    pub max_upload_queue_size: usize,
}

fn default_window() -> Duration {
    Duration::from_secs(3600)
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_max_concurrent_uploads() -> usize {
    20
}

fn default_max_upload_queue_size() -> usize {
    400
}

impl CacheConfig {
    /// A config for `topic` with all other values at their defaults.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            recheck: default_window(),
            expires: default_window(),
            refresh_timeout: default_timeout(),
            remote_timeout: default_timeout(),
            refresh_interval: None,
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_upload_queue_size: default_max_upload_queue_size(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            anyhow::bail!("cache topic must not be empty");
        }
        if self.max_concurrent_uploads == 0 || self.max_upload_queue_size == 0 {
            anyhow::bail!("upload limits must be greater than zero");
        }
        Ok(())
    }
}

/// The whole configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration of the logging system.
    pub logging: Logging,

    /// Configuration of the statsd metrics.
    pub metrics: Metrics,

    /// The remote tier shared by all caches, if any.
    ///
    /// Given as a map with the backend as its single key, like `filesystem: { path: ... }`.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub remote: Option<RemoteStoreConfig>,

    /// The caches to run.
    pub caches: Vec<CacheConfig>,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Self = serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        for cache in &config.caches {
            cache
                .validate()
                .with_context(|| format!("invalid configuration for cache {:?}", cache.topic))?;
        }
        Ok(config)
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
