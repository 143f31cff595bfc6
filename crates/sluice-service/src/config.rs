use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

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
    /// The log level for sluice.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
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
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "sluice".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Tuning for the [`FileRequester`](crate::requester::FileRequester).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RequesterConfig {
    /// The maximum number of requests that may join a single in-flight read.
    ///
    /// Requests beyond this limit are deferred and retried after `retry_delay`.
    ///
    /// Defaults to `128`.
    pub max_fanout: usize,

    /// Logs cache hits, deferrals and batch sizes at `INFO` instead of `TRACE`.
    pub enable_log: bool,

    /// Number of files kept in the in-memory cache.
    ///
    /// `0` disables the cache, every request then reads from disk (still coalesced).
    ///
    /// Defaults to `32`.
    pub cache_capacity: usize,

    /// Fixed delay before a deferred request is retried.
    ///
    /// Defaults to `1024ms`.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            max_fanout: 128,
            enable_log: false,
            cache_capacity: 32,
            retry_delay: Duration::from_millis(1024),
        }
    }
}

/// Policy for the static file routes.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Sends `last-modified` and answers matching `if-modified-since` with `304`.
    pub enable_cache: bool,

    /// File extensions (without the dot) which are served gzip-compressed.
    pub gzip_suffix: Vec<String>,
}

/// The sluice configuration, usually loaded from a YAML file via [`Config::get`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Directory with the static site, this is consulted first.
    pub static_dir: PathBuf,

    /// Directory with additional data files, consulted when `static_dir` has no match.
    pub data_dir: PathBuf,

    /// Where uploaded files are stored. Uploads are buffered in memory if unset.
    pub cache_dir: Option<PathBuf>,

    /// Remove `cache_dir` when the server shuts down.
    pub clear_cache: bool,

    /// Body size limit for uploads, in bytes.
    pub max_upload_size: usize,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Coalescing and in-memory caching of file reads.
    pub requester: RequesterConfig,

    /// Conditional caching and compression policy.
    pub router: RouterConfig,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:3080".to_owned()
    } else {
        "127.0.0.1:3080".to_owned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            static_dir: PathBuf::from("static"),
            data_dir: PathBuf::from("data"),
            cache_dir: Some(PathBuf::from("cache")),
            clear_cache: false,
            max_upload_size: 100 * 1024 * 1024,
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            requester: RequesterConfig::default(),
            router: RouterConfig::default(),
        }
    }
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
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Overrides the port of [`bind`](Self::bind), keeping the configured host.
    pub fn set_port(&mut self, port: u16) {
        let host = match self.bind.rsplit_once(':') {
            Some((host, _)) => host,
            None => self.bind.as_str(),
        };
        self.bind = format!("{host}:{port}");
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
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
