//! Coalescing of concurrent file reads.
//!
//! The [`FileRequester`] makes sure that at most one read per path is outstanding at any time.
//! Every request that arrives while a read is running joins its [`MissionState::InFlight`]
//! queue, and gets served with the very same contents once the read finishes. Completed reads
//! land in a [`RecencyCache`], keyed by path and tagged with the modification time the read was
//! started for.
//!
//! Callers are expected to `stat` the file themselves and pass in its modification time. The
//! requester never checks the filesystem for staleness, a different timestamp is simply a miss.

use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::join_all;

use crate::caching::{CacheEntry, ConfigError, RecencyCache};
use crate::config::RequesterConfig;
use crate::sink::{ResponseSink, ServeError};
use crate::utils::compression::GzipChunks;

mod mission;
mod retry;
mod source;


use mission::{Mission, PendingRequest};

pub use mission::MissionState;
pub use retry::{RetryHandle, RetryScheduler};
pub use source::{FileSource, FsSource};

/// Logs at `INFO` when per-request logging is enabled, and at `TRACE` otherwise.
macro_rules! request_event {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// What happened to a request handed to [`FileRequester::request`].
#[derive(Debug)]
pub enum Disposition {
    /// Served from the in-memory cache.
    CacheHit,
    /// Started a new read.
    Started,
    /// Joined the read that was already in flight.
    Joined,
    /// The in-flight read was saturated, the request will be retried.
    Deferred(RetryHandle),
}

struct RequesterState {
    missions: HashMap<PathBuf, Mission>,
    cache: Option<RecencyCache<PathBuf, CacheEntry>>,
}

struct RequesterInner {
    config: RequesterConfig,
    source: Box<dyn FileSource>,
    state: Mutex<RequesterState>,
    retries: RetryScheduler,
}

impl RequesterInner {
    fn state(&self) -> MutexGuard<'_, RequesterState> {
        // the state is never left half-updated, so a poisoned lock is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serves file contents into [`ResponseSink`]s, coalescing concurrent reads of the same path.
///
/// This is a cheap handle, clones share the same missions, cache and retries.
#[derive(Clone)]
pub struct FileRequester {
    inner: Arc<RequesterInner>,
}

impl FileRequester {
    /// Creates a requester reading from the local filesystem.
    pub fn new(config: RequesterConfig) -> Result<Self, ConfigError> {
        Self::with_source(config, FsSource)
    }

    /// Creates a requester reading through `source`.
    ///
    /// Fails if `max_fanout` is `0`. A `cache_capacity` of `0` disables the cache.
    pub fn with_source(
        config: RequesterConfig,
        source: impl FileSource,
    ) -> Result<Self, ConfigError> {
        if config.max_fanout == 0 {
            return Err(ConfigError::ZeroFanout);
        }
        let cache = match config.cache_capacity {
            0 => None,
            capacity => Some(RecencyCache::new(capacity)?),
        };

        Ok(Self {
            inner: Arc::new(RequesterInner {
                config,
                source: Box::new(source),
                state: Mutex::new(RequesterState {
                    missions: HashMap::new(),
                    cache,
                }),
                retries: RetryScheduler::new(),
            }),
        })
    }

    pub fn config(&self) -> &RequesterConfig {
        &self.inner.config
    }

    /// Serves the contents of `path` as of `modified` into `sink`.
    ///
    /// The sink is written and closed asynchronously, this returns right away. Failures are
    /// delivered through the sink and never returned here. `compress` selects a gzip stream
    /// instead of the raw bytes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request(
        &self,
        path: impl Into<PathBuf>,
        sink: ResponseSink,
        modified: SystemTime,
        compress: bool,
    ) -> Disposition {
        metric!(counter("requester.access") += 1);
        let request = PendingRequest { sink, compress };
        self.request_pending(path.into(), request, modified, None)
    }

    /// Runs a request, reusing `retry` if it gets deferred again.
    fn request_pending(
        &self,
        path: PathBuf,
        request: PendingRequest,
        modified: SystemTime,
        retry: Option<RetryHandle>,
    ) -> Disposition {
        let enable_log = self.inner.config.enable_log;
        let mut state = self.inner.state();

        if let Some(mission) = state.missions.get_mut(&path) {
            if mission.fanout() >= self.inner.config.max_fanout {
                drop(state);
                return Disposition::Deferred(self.defer(path, request, modified, retry));
            }

            mission.join(request);
            metric!(counter("requester.mission.joined") += 1);
            return Disposition::Joined;
        }

        let cached = state
            .cache
            .as_mut()
            .and_then(|cache| cache.get(&path))
            .and_then(|entry| entry.content_for(modified))
            .cloned();

        if let Some(content) = cached {
            drop(state);
            metric!(counter("requester.cache.hit") += 1);
            request_event!(enable_log, path = %path.display(), "serving from cache");
            tokio::spawn(serve(request, content));
            return Disposition::CacheHit;
        }

        state.missions.insert(path.clone(), Mission::new(request));
        drop(state);
        metric!(counter("requester.mission.created") += 1);

        let this = self.clone();
        tokio::spawn(async move { this.run_mission(path, modified).await });
        Disposition::Started
    }

    fn defer(
        &self,
        path: PathBuf,
        request: PendingRequest,
        modified: SystemTime,
        retry: Option<RetryHandle>,
    ) -> RetryHandle {
        metric!(counter("requester.deferred") += 1);
        request_event!(
            self.inner.config.enable_log,
            path = %path.display(),
            delay = ?self.inner.config.retry_delay,
            "fanout saturated, deferring request"
        );

        let handle = retry.unwrap_or_else(|| self.inner.retries.handle());
        let this = self.clone();
        let next = handle.clone();
        self.inner.retries.schedule(
            &handle,
            self.inner.config.retry_delay,
            (path, request),
            move |(path, request)| {
                this.request_pending(path, request, modified, Some(next));
            },
            |(_, request)| request.sink.fail(ServeError::Cancelled),
        );
        handle
    }

    async fn run_mission(self, path: PathBuf, modified: SystemTime) {
        let source = &self.inner.source;
        let result = AssertUnwindSafe(async { source.read(&path).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(io::Error::other("file read panicked")));

        let queue = {
            let mut state = self.inner.state();
            let mission = state.missions.remove(&path);

            if let (Ok(content), Some(cache)) = (&result, state.cache.as_mut()) {
                let entry = CacheEntry {
                    content: content.clone(),
                    modified,
                };
                if let Some((evicted, _)) = cache.set(path.clone(), entry) {
                    metric!(counter("requester.cache.evicted") += 1);
                    tracing::trace!(path = %evicted.display(), "evicted from cache");
                }
            }

            mission.map(Mission::into_queue).unwrap_or_default()
        };

        let batch_size = queue.len();
        metric!(histogram("requester.batch_size") = batch_size as u64);

        match result {
            Ok(content) => {
                metric!(counter("requester.read") += 1, "status" => "ok");
                request_event!(
                    self.inner.config.enable_log,
                    path = %path.display(),
                    batch_size,
                    "serving batch"
                );
                join_all(queue.into_iter().map(|request| serve(request, content.clone()))).await;
            }
            Err(err) => {
                metric!(counter("requester.read") += 1, "status" => "error");
                let error = ServeError::read(err);
                tracing::error!(
                    path = %path.display(),
                    batch_size,
                    error = &error as &dyn std::error::Error,
                    "failed to read file"
                );
                join_all(
                    queue
                        .into_iter()
                        .map(|request| request.sink.fail(error.clone())),
                )
                .await;
            }
        }
    }

    /// Returns whether a read for `path` is currently in flight.
    pub fn mission_state(&self, path: &Path) -> MissionState {
        match self.inner.state().missions.get(path) {
            Some(mission) => MissionState::InFlight {
                fanout: mission.fanout(),
            },
            None => MissionState::Idle,
        }
    }

    /// Returns the cached entry for `path`, without affecting its recency.
    pub fn cached(&self, path: &Path) -> Option<CacheEntry> {
        self.inner.state().cache.as_ref()?.peek(path).cloned()
    }

    /// Number of deferred requests still waiting for their retry.
    pub fn pending_retries(&self) -> usize {
        self.inner.retries.pending()
    }

    /// Cancels all deferred requests and waits until their sinks have been failed.
    ///
    /// Reads already in flight are not affected and complete normally.
    pub async fn shutdown(&self) {
        tracing::debug!(
            pending = self.pending_retries(),
            "cancelling deferred requests"
        );
        self.inner.retries.shutdown().await;
    }
}

impl std::fmt::Debug for FileRequester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("FileRequester")
            .field("config", &self.inner.config)
            .field("missions", &state.missions.len())
            .field("cache", &state.cache)
            .finish()
    }
}

/// Writes `content` into the sink, gzip-compressed if requested, and closes it.
async fn serve(request: PendingRequest, content: Bytes) {
    let PendingRequest { mut sink, compress } = request;

    if !compress {
        if !content.is_empty() && sink.write(content).await.is_err() {
            tracing::trace!("response body dropped before serving");
            return;
        }
        sink.close();
        return;
    }

    // CPU bound, runs on the blocking pool
    let compressed = tokio::task::spawn_blocking(move || {
        GzipChunks::new(&content).collect::<io::Result<Vec<_>>>()
    })
    .await
    .unwrap_or_else(|err| Err(io::Error::other(err)));

    let chunks = match compressed {
        Ok(chunks) => chunks,
        Err(err) => {
            let error = ServeError::compression(err);
            tracing::error!(error = &error as &dyn std::error::Error, "compression failed");
            sink.fail(error).await;
            return;
        }
    };

    for chunk in chunks {
        if sink.write(chunk).await.is_err() {
            tracing::trace!("response body dropped while serving compressed content");
            return;
        }
    }
    sink.close();
}
