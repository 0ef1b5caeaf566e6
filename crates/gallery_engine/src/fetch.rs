use engine_logging::engine_debug;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;

use crate::cache::DiskCache;
use crate::types::{FailureKind, FetchError, FetchMetadata, FetchOutput};

/// Knobs for the HTTP fetch path.
///
/// There is deliberately no request deadline: an in-flight fetch is only ever
/// interrupted by its owner's cancellation signal.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub max_bytes: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("gallery-engine/", env!("CARGO_PKG_VERSION")).to_string(),
            max_bytes: 20 * 1024 * 1024,
        }
    }
}

/// One cancellable GET.
///
/// `None` means the fetch lost the race against `cancel`: nothing is
/// delivered and the transport request is abandoned. Transport failures come
/// back as `Some(Err(_))`; there is no retry at this layer.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Option<Result<FetchOutput, FetchError>>;
}

/// `Fetcher` over a shared `reqwest` client with an optional disk cache in
/// front of the network.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    cache: Option<DiskCache>,
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(client: reqwest::Client, cache: Option<DiskCache>, settings: FetchSettings) -> Self {
        Self {
            client,
            cache,
            settings,
        }
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Option<Result<FetchOutput, FetchError>> {
        let parsed = match reqwest::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Some(Err(FetchError::new(FailureKind::InvalidUrl, err.to_string())))
            }
        };

        if cancel.is_cancelled() {
            return None;
        }

        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.load(url) {
                engine_debug!("fetch {url}: served from cache ({} bytes)", bytes.len());
                let byte_len = bytes.len() as u64;
                return Some(Ok(FetchOutput {
                    bytes,
                    metadata: FetchMetadata {
                        final_url: url.to_string(),
                        content_type: None,
                        byte_len,
                        cache_hit: true,
                    },
                }));
            }
        }

        // Dropping the send future mid-flight abandons the transport request,
        // which is the best cancellation reqwest offers.
        let response = tokio::select! {
            _ = cancel.cancelled() => return None,
            sent = self.client.get(parsed).send() => match sent {
                Ok(response) => response,
                Err(err) => return Some(Err(network_error(err))),
            },
        };

        let status = response.status();
        if !status.is_success() {
            return Some(Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            )));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Some(Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                )));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return None,
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => return Some(Err(network_error(err))),
                },
            };
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Some(Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.store(url, &bytes) {
                engine_debug!("fetch {url}: cache store failed: {err}");
            }
        }
        engine_debug!("fetch {url}: served from network ({} bytes)", bytes.len());

        let byte_len = bytes.len() as u64;
        Some(Ok(FetchOutput {
            bytes,
            metadata: FetchMetadata {
                final_url,
                content_type,
                byte_len,
                cache_hit: false,
            },
        }))
    }
}

fn network_error(err: reqwest::Error) -> FetchError {
    FetchError::new(FailureKind::Network, err.to_string())
}
