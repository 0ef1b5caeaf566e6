use std::sync::{Arc, Mutex};
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use gallery_core::{absolutize_permalink, ensure_image_extension, MetadataItem};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::feed::{FeedSource, KIND_CONTENT_POST};
use crate::task_group::TaskGroup;

/// Consumer-side delivery surface for the metadata stream.
///
/// Invoked from the subscription's producer task, one item at a time, and
/// never after `close()` has returned.
pub trait MetadataSink: Send + Sync {
    fn on_metadata(&self, item: MetadataItem);
}

/// Producer tuning. `backoff_floor` is both the initial retry delay and the
/// value the delay resets to after a successful page.
#[derive(Debug, Clone)]
pub(crate) struct StreamSettings {
    pub(crate) permalink_base: String,
    pub(crate) backoff_floor: Duration,
}

/// Demand-throttled subscription over the paginated feed.
///
/// At most one page is fetched and delivered per `load_next_batch()` call;
/// upstream failures are retried with exponential backoff until the
/// subscription closes.
pub struct MetadataSubscription {
    group: TaskGroup,
    gate: Arc<DemandGate>,
}

impl MetadataSubscription {
    pub(crate) fn start(
        group: TaskGroup,
        feed: Arc<dyn FeedSource>,
        sink: Arc<dyn MetadataSink>,
        settings: StreamSettings,
        start_cursor: Option<String>,
    ) -> Self {
        let gate = Arc::new(DemandGate::default());
        let cancel = group.cancel_token();
        group.spawn(run_producer(
            feed,
            sink,
            gate.clone(),
            cancel,
            settings,
            start_cursor,
        ));
        Self { group, gate }
    }

    /// Requests one more page. A no-op while the previous request is still
    /// being fetched or delivered; extra calls are dropped, not queued.
    pub fn load_next_batch(&self) {
        if !self.gate.request() {
            engine_debug!("batch already loading, request dropped");
        }
    }

    /// Stops the producer and blocks until it has exited; no metadata is
    /// delivered after this returns. Call from a thread outside the engine
    /// runtime.
    pub fn close(self) {
        self.group.close();
        engine_info!("metadata subscription closed");
    }
}

/// Idle/Loading flag plus the wakeup for the producer. The flag flips to
/// Loading on the first demand and back to Idle only once the demanded page
/// has been fully delivered.
#[derive(Default)]
struct DemandGate {
    loading: Mutex<bool>,
    demand: Notify,
}

impl DemandGate {
    /// Returns false when a batch is already loading and the call was
    /// dropped.
    fn request(&self) -> bool {
        let mut loading = self.loading.lock().expect("demand gate lock poisoned");
        if *loading {
            return false;
        }
        *loading = true;
        self.demand.notify_one();
        true
    }

    fn settle(&self) {
        *self.loading.lock().expect("demand gate lock poisoned") = false;
    }

    async fn demanded(&self) {
        self.demand.notified().await;
    }
}

/// Exponential retry delay: starts at the floor, doubles per consecutive
/// failure, resets on success. Growth is unbounded.
struct Backoff {
    floor: Duration,
    delay: Duration,
}

impl Backoff {
    fn new(floor: Duration) -> Self {
        Self {
            floor,
            delay: floor,
        }
    }

    /// The delay to wait before the next retry; the one after is doubled.
    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = self.delay.saturating_mul(2);
        delay
    }

    fn reset(&mut self) {
        self.delay = self.floor;
    }
}

async fn run_producer(
    feed: Arc<dyn FeedSource>,
    sink: Arc<dyn MetadataSink>,
    gate: Arc<DemandGate>,
    cancel: CancellationToken,
    settings: StreamSettings,
    start_cursor: Option<String>,
) {
    let mut cursor = start_cursor;
    let mut backoff = Backoff::new(settings.backoff_floor);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = gate.demanded() => {}
        }

        // One demanded batch: retry the same cursor until a page lands or
        // the subscription closes.
        let page = loop {
            match feed.fetch_page(cursor.as_deref(), &cancel).await {
                None => return,
                Some(Ok(page)) => break page,
                Some(Err(err)) => {
                    let delay = backoff.next_delay();
                    engine_warn!(
                        "feed page after cursor {cursor:?} failed: {err}; retrying in {delay:?}"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };
        backoff.reset();

        for entry in page.items {
            if entry.kind != KIND_CONTENT_POST || entry.url.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                return;
            }
            let item = MetadataItem {
                url: ensure_image_extension(&entry.url),
                title: entry.title,
                author: entry.author,
                permalink: absolutize_permalink(&settings.permalink_base, &entry.permalink),
                id: entry.id,
            };
            let delivered_id = item.id.clone();
            sink.on_metadata(item);
            cursor = Some(delivered_id);
        }
        if let Some(next) = page.next_cursor {
            cursor = Some(next);
        }
        gate.settle();
    }
}
