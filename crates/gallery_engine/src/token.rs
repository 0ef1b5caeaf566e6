use std::sync::Arc;

use bytes::Bytes;
use engine_logging::{engine_debug, engine_warn};
use gallery_core::ImageRequest;
use tokio_util::sync::CancellationToken;

use crate::fetch::Fetcher;
use crate::task_group::TaskGroup;
use crate::transform::transform_image;

/// Consumer-side delivery surface for one image request.
///
/// Exactly one of the two methods is invoked per request — unless the
/// request is closed first, in which case neither is.
pub trait ImageSink: Send + Sync {
    fn on_image_ready(&self, image: Bytes, id: &str);
    fn on_image_failed(&self, id: &str);
}

/// Handle to one in-flight fetch-and-transform request.
pub struct ImageSubscription {
    group: TaskGroup,
}

impl ImageSubscription {
    pub(crate) fn start(
        group: TaskGroup,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn ImageSink>,
        request: ImageRequest,
    ) -> Self {
        let cancel = group.cancel_token();
        group.spawn(run_request(fetcher, sink, request, cancel));
        Self { group }
    }

    /// Abandons the request and blocks until its background work has
    /// stopped; no callback fires after this returns. Call from a thread
    /// outside the engine runtime.
    pub fn close(self) {
        self.group.close();
    }
}

async fn run_request(
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn ImageSink>,
    request: ImageRequest,
    cancel: CancellationToken,
) {
    engine_debug!(
        "image request {}: {} at {}x{}",
        request.id,
        request.url,
        request.target_width,
        request.target_height
    );

    let fetched = match fetcher.fetch(&request.url, &cancel).await {
        None => return,
        Some(Err(err)) => {
            engine_warn!("image request {} failed to download: {err}", request.id);
            if cancel.is_cancelled() {
                return;
            }
            sink.on_image_failed(&request.id);
            return;
        }
        Some(Ok(output)) => output,
    };

    let stage_cancel = cancel.clone();
    let (width, height) = (request.target_width, request.target_height);
    let transformed = tokio::task::spawn_blocking(move || {
        transform_image(&fetched.bytes, width, height, &stage_cancel)
    })
    .await;
    let Ok(transformed) = transformed else {
        engine_warn!("image request {}: transform task aborted", request.id);
        return;
    };

    match transformed {
        None => {}
        Some(Err(err)) => {
            engine_warn!("image request {} failed to transform: {err}", request.id);
            if cancel.is_cancelled() {
                return;
            }
            sink.on_image_failed(&request.id);
        }
        Some(Ok(image)) => {
            if cancel.is_cancelled() {
                return;
            }
            sink.on_image_ready(Bytes::from(image), &request.id);
        }
    }
}
