//! Network access for cache misses.

use async_trait::async_trait;
use thiserror::Error;

use super::request::{Request, Response};

/// The request never produced a response (offline, DNS, TLS, timeout...).
///
/// An HTTP error status is still a [`Response`], not a `FetchError`.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct FetchError(pub String);

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// A fetcher for hosts with no network stack. Every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
        Err(FetchError("offline".to_string()))
    }
}

#[cfg(feature = "http")]
pub use http::HttpFetcher;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use log::{debug, warn};
    use reqwest::Client;

    use super::{FetchError, Fetcher};
    use crate::cache::request::{Request, Response};

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    const MAX_IDLE_PER_HOST: usize = 8;

    /// Fetcher backed by a pooled `reqwest` client.
    pub struct HttpFetcher {
        client: Client,
    }

    impl HttpFetcher {
        pub fn new() -> Result<Self, FetchError> {
            let client = Client::builder()
                .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| FetchError(format!("Failed to create HTTP client: {}", e)))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl Fetcher for HttpFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
                .map_err(|e| FetchError(e.to_string()))?;

            let mut builder = self.client.request(method, request.url.clone());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let resp = builder.send().await.map_err(|e| {
                warn!("[HttpFetcher] {} failed: {}", request.url, e);
                FetchError(e.to_string())
            })?;

            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let body = resp.bytes().await.map_err(|e| FetchError(e.to_string()))?;

            debug!(
                "[HttpFetcher] {} {} -> {} ({} bytes)",
                request.method.as_str(),
                request.url,
                status,
                body.len()
            );

            Ok(Response {
                status,
                headers,
                body,
            })
        }
    }
}
