//! Fetch pool with a bounded number of in-flight requests
//!
//! All network and local file reads made during a transaction go through
//! [`FetchClient`]. `http(s):` URLs use a pooled reqwest client; `file:` URLs
//! are read from disk and answered with a synthetic status so callers can
//! treat both the same way.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder};
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

use pinmap_core::error::PinmapError;

use crate::RegistryResult;

/// Default number of simultaneous fetches
pub const DEFAULT_CONCURRENCY: usize = 32;

/// A completed fetch
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// 2xx or 304
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status) || self.status == 304
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().ends_with("json"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Fail with `FetchFailed` unless the status is ok
    pub fn error_for_status(self) -> RegistryResult<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(PinmapError::status(self.url, self.status))
        }
    }
}

/// HTTP and file fetcher shared by every resolver operation
#[derive(Debug, Clone)]
pub struct FetchClient {
    /// Underlying HTTP client with connection pooling
    client: Client,
    /// Bounds in-flight fetches across all clones
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl FetchClient {
    pub fn new() -> RegistryResult<Self> {
        Self::with_concurrency(DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(concurrency: usize) -> RegistryResult<Self> {
        let concurrency = concurrency.max(1);
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(concurrency)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .user_agent(concat!("pinmap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PinmapError::fetch("", format!("Failed to create HTTP client: {}", e), e))?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch `url`, waiting for a free slot in the pool first.
    ///
    /// Non-2xx statuses are returned, not raised; transport failures are
    /// `FetchFailed`.
    pub async fn fetch(&self, url: &Url) -> RegistryResult<FetchResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PinmapError::internal("fetch pool closed"))?;

        match url.scheme() {
            "file" => self.fetch_file(url).await,
            "http" | "https" => self.fetch_http(url).await,
            scheme => Err(PinmapError::FetchFailed {
                url: url.to_string(),
                status: None,
                message: format!("unsupported URL scheme '{}'", scheme),
                source: None,
            }),
        }
    }

    async fn fetch_http(&self, url: &Url) -> RegistryResult<FetchResponse> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PinmapError::fetch(url.as_str(), format!("request failed: {}", e), e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(|e| PinmapError::fetch(url.as_str(), format!("failed to read body: {}", e), e))?
            .to_vec();

        Ok(FetchResponse {
            url: url.to_string(),
            status,
            content_type,
            body,
        })
    }

    async fn fetch_file(&self, url: &Url) -> RegistryResult<FetchResponse> {
        let path = url.to_file_path().map_err(|()| PinmapError::FetchFailed {
            url: url.to_string(),
            status: None,
            message: "not a local file path".to_string(),
            source: None,
        })?;

        match tokio::fs::read(&path).await {
            Ok(body) => Ok(FetchResponse {
                url: url.to_string(),
                status: 200,
                content_type: content_type_for(url.path()).map(String::from),
                body,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FetchResponse {
                url: url.to_string(),
                status: 404,
                content_type: None,
                body: Vec::new(),
            }),
            Err(e) => Err(PinmapError::fetch(url.as_str(), format!("failed to read file: {}", e), e)),
        }
    }
}

fn content_type_for(path: &str) -> Option<&'static str> {
    let extension = path.rsplit('/').next()?.rsplit_once('.')?.1;
    match extension {
        "json" => Some("application/json"),
        "js" | "mjs" | "cjs" => Some("application/javascript"),
        "css" => Some("text/css"),
        "wasm" => Some("application/wasm"),
        _ => None,
    }
}
