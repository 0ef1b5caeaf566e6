use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::fetch::Fetcher;
use crate::types::{FailureKind, FetchError};

/// Entry `kind` for plain content posts. Everything else in a page is feed
/// chrome (stickies, promos) and is skipped.
pub const KIND_CONTENT_POST: &str = "content-post";

/// One page of the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    #[serde(default)]
    pub items: Vec<FeedEntry>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct FeedEntry {
    pub id: String,
    pub url: String,
    pub title: String,
    pub author: String,
    pub permalink: String,
    pub kind: String,
}

/// Paginated feed collaborator. `None` means the page fetch was cancelled.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Option<Result<FeedPage, FetchError>>;
}

/// Feed source that GETs `{feed_url}?after={cursor}` and parses the JSON
/// page body.
pub struct HttpFeedSource {
    fetcher: Arc<dyn Fetcher>,
    feed_url: String,
}

impl HttpFeedSource {
    pub fn new(fetcher: Arc<dyn Fetcher>, feed_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            feed_url: feed_url.into(),
        }
    }

    fn page_url(&self, cursor: Option<&str>) -> String {
        let Some(cursor) = cursor else {
            return self.feed_url.clone();
        };
        match url::Url::parse(&self.feed_url) {
            Ok(mut parsed) => {
                parsed.query_pairs_mut().append_pair("after", cursor);
                parsed.to_string()
            }
            // Let the fetcher report the malformed URL.
            Err(_) => format!("{}?after={cursor}", self.feed_url),
        }
    }
}

#[async_trait::async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Option<Result<FeedPage, FetchError>> {
        let url = self.page_url(cursor);
        let output = match self.fetcher.fetch(&url, cancel).await? {
            Ok(output) => output,
            Err(err) => return Some(Err(err)),
        };
        let page = serde_json::from_slice::<FeedPage>(&output.bytes)
            .map_err(|err| FetchError::new(FailureKind::Parse, err.to_string()));
        Some(page)
    }
}
