//! Gallery engine: cancellable IO pipeline for a streaming image feed.
mod cache;
mod engine;
mod feed;
mod fetch;
mod stream;
mod task_group;
mod token;
mod transform;
mod types;

pub use cache::DiskCache;
pub use engine::{Engine, EngineConfig, EngineError};
pub use feed::{FeedEntry, FeedPage, FeedSource, HttpFeedSource, KIND_CONTENT_POST};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use stream::{MetadataSink, MetadataSubscription};
pub use token::{ImageSink, ImageSubscription};
pub use transform::{transform_image, TransformError};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput};
