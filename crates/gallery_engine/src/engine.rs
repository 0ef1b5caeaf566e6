use std::io;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use engine_logging::engine_info;
use gallery_core::ImageRequest;
use tokio::runtime::Handle;

use crate::cache::DiskCache;
use crate::feed::HttpFeedSource;
use crate::fetch::{FetchSettings, Fetcher, ReqwestFetcher};
use crate::stream::{MetadataSink, MetadataSubscription, StreamSettings};
use crate::task_group::TaskGroup;
use crate::token::{ImageSink, ImageSubscription};

/// Engine-wide configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Feed endpoint returning JSON pages; the cursor is passed as `?after=`.
    pub feed_url: String,
    /// Base joined onto feed-relative permalinks.
    pub permalink_base: String,
    /// Directory for the HTTP response cache; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    pub cache_max_bytes: u64,
    pub fetch: FetchSettings,
    /// Initial metadata retry delay; doubles per consecutive failure.
    pub backoff_floor: Duration,
}

impl EngineConfig {
    pub fn new(feed_url: impl Into<String>, permalink_base: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            permalink_base: permalink_base.into(),
            cache_dir: None,
            cache_max_bytes: 10 * 1024 * 1024,
            fetch: FetchSettings::default(),
            backoff_floor: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start engine runtime: {0}")]
    Runtime(io::Error),
    #[error("failed to open response cache: {0}")]
    Cache(io::Error),
    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Shared context for all subscriptions: the runtime, the HTTP client, and
/// the response cache live here rather than in process-wide globals.
///
/// The runtime is owned by a dedicated thread, so the engine can be created
/// and dropped from any thread, including inside another runtime.
pub struct Engine {
    runtime: Handle,
    fetcher: Arc<dyn Fetcher>,
    feed_url: String,
    permalink_base: String,
    backoff_floor: Duration,
    // Dropping this releases the runtime thread.
    _shutdown: mpsc::Sender<()>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let cache = match &config.cache_dir {
            Some(dir) => {
                Some(DiskCache::open(dir, config.cache_max_bytes).map_err(EngineError::Cache)?)
            }
            None => None,
        };
        let client = reqwest::Client::builder()
            .user_agent(config.fetch.user_agent.clone())
            .build()
            .map_err(|err| EngineError::Client(err.to_string()))?;
        let fetcher = Arc::new(ReqwestFetcher::new(client, cache, config.fetch));

        let (runtime, shutdown) = spawn_runtime_thread()?;
        engine_info!("engine started for feed {}", config.feed_url);

        Ok(Self {
            runtime,
            fetcher,
            feed_url: config.feed_url,
            permalink_base: config.permalink_base,
            backoff_floor: config.backoff_floor,
            _shutdown: shutdown,
        })
    }

    /// Starts the metadata producer for one consumer. Items arrive on the
    /// sink in feed order, one page per `load_next_batch()` call.
    pub fn subscribe_metadata(
        &self,
        sink: Arc<dyn MetadataSink>,
        start_cursor: Option<String>,
    ) -> MetadataSubscription {
        engine_info!("metadata subscription starting at cursor {start_cursor:?}");
        let group = TaskGroup::new(self.runtime.clone());
        let feed = Arc::new(HttpFeedSource::new(
            self.fetcher.clone(),
            self.feed_url.clone(),
        ));
        let settings = StreamSettings {
            permalink_base: self.permalink_base.clone(),
            backoff_floor: self.backoff_floor,
        };
        MetadataSubscription::start(group, feed, sink, settings, start_cursor)
    }

    /// Fetches and prepares one image. The outcome — or nothing, if the
    /// subscription is closed first — is reported through the sink.
    pub fn subscribe_image(
        &self,
        sink: Arc<dyn ImageSink>,
        request: ImageRequest,
    ) -> ImageSubscription {
        let group = TaskGroup::new(self.runtime.clone());
        ImageSubscription::start(group, self.fetcher.clone(), sink, request)
    }
}

fn spawn_runtime_thread() -> Result<(Handle, mpsc::Sender<()>), EngineError> {
    let (handle_tx, handle_rx) = mpsc::channel();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    thread::Builder::new()
        .name("gallery-engine".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("gallery-worker")
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = handle_tx.send(Err(err));
                    return;
                }
            };
            let _ = handle_tx.send(Ok(runtime.handle().clone()));
            // Parks until the engine is dropped, then tears the runtime down
            // on this thread.
            let _ = shutdown_rx.recv();
        })
        .map_err(EngineError::Runtime)?;

    match handle_rx.recv() {
        Ok(Ok(handle)) => Ok((handle, shutdown_tx)),
        Ok(Err(err)) => Err(EngineError::Runtime(err)),
        Err(_) => Err(EngineError::Runtime(io::Error::other(
            "runtime thread exited before start",
        ))),
    }
}
