//! Caller-facing configuration: downloader defaults, per-request transport
//! options, and transfer requests.
//!
//! Everything here is validated synchronously, before any network call, so
//! caller mistakes surface as precondition errors rather than transfer failures.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use serde::Deserialize;
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_WORKERS, DEFAULT_MIN_BYTES_PER_WORKER,
    DEFAULT_READ_CHUNK_SIZE, READ_TIMEOUT_SECS,
};
use super::error::DownloadError;

/// Defaults shared by every transfer a [`Downloader`](super::Downloader) runs.
///
/// Deserializable so a JSON config file can provide it; missing fields take
/// the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloaderConfig {
    /// Upper bound on concurrent range workers per transfer.
    pub max_workers: usize,
    /// Minimum bytes each worker should fetch before another worker is added.
    pub min_bytes_per_worker: u64,
    /// Size of each delivered chunk.
    pub read_chunk_size: usize,
    /// Connect timeout for the shared client, in seconds.
    pub connect_timeout_secs: u64,
    /// Overall per-request timeout for the shared client, in seconds.
    pub read_timeout_secs: u64,
    /// Worker threads for an owned runtime; `None` uses Tokio's default.
    pub worker_threads: Option<usize>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            min_bytes_per_worker: DEFAULT_MIN_BYTES_PER_WORKER,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            worker_threads: None,
        }
    }
}

impl DownloaderConfig {
    /// Rejects zero-valued limits.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidOptions`] naming the first bad field.
    pub fn validate(&self) -> Result<(), DownloadError> {
        validate_limits(self.max_workers, self.min_bytes_per_worker)?;
        if self.read_chunk_size == 0 {
            return Err(DownloadError::invalid_options(
                "read_chunk_size must be at least 1",
            ));
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(DownloadError::invalid_options(
                "timeouts must be at least 1 second",
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(DownloadError::invalid_options(
                "worker_threads must be at least 1",
            ));
        }
        Ok(())
    }
}

fn validate_limits(max_workers: usize, min_bytes_per_worker: u64) -> Result<(), DownloadError> {
    if max_workers == 0 {
        return Err(DownloadError::invalid_options(
            "max_workers must be at least 1",
        ));
    }
    if min_bytes_per_worker == 0 {
        return Err(DownloadError::invalid_options(
            "min_bytes_per_worker must be at least 1",
        ));
    }
    Ok(())
}

/// Pass-through transport options for one transfer.
///
/// The `Range` header is reserved: the downloader sets it per worker.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers sent with every request of the transfer.
    pub headers: HeaderMap,
    /// Proxy URL (`http://` or `https://`); the transfer gets a dedicated client.
    pub proxy: Option<String>,
    /// Per-request timeout, overriding the client's read timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidOptions`] for an unparsable name or value
    /// and [`DownloadError::ReservedHeader`] for `Range`.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, DownloadError> {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| DownloadError::invalid_options(format!("invalid header name: {name}")))?;
        if header_name == RANGE {
            return Err(DownloadError::ReservedHeader {
                name: header_name.to_string(),
            });
        }
        let header_value = HeaderValue::from_str(value.trim()).map_err(|_| {
            DownloadError::invalid_options(format!("invalid value for header {name}"))
        })?;
        self.headers.append(header_name, header_value);
        Ok(self)
    }

    /// Routes the transfer through `proxy`.
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Checks the options without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ReservedHeader`] if `Range` was inserted directly
    /// into `headers`, and [`DownloadError::InvalidProxy`] for a malformed proxy.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.headers.contains_key(RANGE) {
            return Err(DownloadError::ReservedHeader {
                name: RANGE.to_string(),
            });
        }
        if let Some(proxy) = &self.proxy {
            let valid = Url::parse(proxy).is_ok_and(|parsed| {
                matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
            });
            if !valid {
                return Err(DownloadError::InvalidProxy {
                    proxy: proxy.clone(),
                });
            }
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(DownloadError::invalid_options("timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Parses `url` and requires an `http`/`https` scheme with a host.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidUrl`] otherwise.
pub fn parse_http_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(DownloadError::invalid_url(url));
    }
    Ok(parsed)
}

/// Everything needed to start one session. Immutable once started.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Resource to download.
    pub url: String,
    /// Transport options for every request of the transfer.
    pub options: RequestOptions,
    /// Worker cap; `None` uses the downloader's configured default.
    pub max_workers: Option<usize>,
    /// Minimum bytes per worker; `None` uses the downloader's configured default.
    pub min_bytes_per_worker: Option<u64>,
}

impl TransferRequest {
    /// Creates a request for `url` with default options.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: RequestOptions::default(),
            max_workers: None,
            min_bytes_per_worker: None,
        }
    }

    /// Replaces the transport options.
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Overrides the worker cap.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Overrides the minimum bytes per worker.
    #[must_use]
    pub fn with_min_bytes_per_worker(mut self, min_bytes_per_worker: u64) -> Self {
        self.min_bytes_per_worker = Some(min_bytes_per_worker);
        self
    }

    /// Resolves worker limits against `config`.
    #[must_use]
    pub fn limits(&self, config: &DownloaderConfig) -> (usize, u64) {
        (
            self.max_workers.unwrap_or(config.max_workers),
            self.min_bytes_per_worker
                .unwrap_or(config.min_bytes_per_worker),
        )
    }

    /// Validates URL, options and limits.
    ///
    /// # Errors
    ///
    /// Returns the matching precondition variant of [`DownloadError`].
    pub fn validate(&self, config: &DownloaderConfig) -> Result<Url, DownloadError> {
        let url = parse_http_url(&self.url)?;
        self.options.validate()?;
        let (max_workers, min_bytes_per_worker) = self.limits(config);
        validate_limits(max_workers, min_bytes_per_worker)?;
        Ok(url)
    }
}
