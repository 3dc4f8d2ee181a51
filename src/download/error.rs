//! Error types for the download module.
//!
//! This module defines structured errors for all download operations,
//! providing context-rich error messages for debugging and user feedback.

use std::path::PathBuf;

use thiserror::Error;

use super::plan::ByteRange;

/// Errors that can occur while probing, fetching, or saving a transfer.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response body failed while a worker was reading it.
    #[error("stream error downloading {url} (range {}): {source}", display_range(.range))]
    Stream {
        /// The URL being fetched.
        url: String,
        /// The worker's range, `None` for an unranged fetch.
        range: Option<ByteRange>,
        /// The underlying body error.
        #[source]
        source: reqwest::Error,
    },

    /// A ranged request was answered with something other than 206.
    #[error("server ignored range {range} for {url} (HTTP {status})")]
    RangeNotHonored {
        /// The URL being fetched.
        url: String,
        /// The requested range.
        range: ByteRange,
        /// The status the server returned instead of 206.
        status: u16,
    },

    /// A 206 response described different bytes than were requested.
    #[error("server returned Content-Range {content_range} for requested range {range} of {url}")]
    ContentRangeMismatch {
        /// The URL being fetched.
        url: String,
        /// The requested range.
        range: ByteRange,
        /// The raw `Content-Range` header value.
        content_range: String,
    },

    /// A worker's body was shorter or longer than its assigned range.
    #[error("worker for range {range} of {url} received {actual} bytes, expected {expected}")]
    Truncated {
        /// The URL being fetched.
        url: String,
        /// The worker's range.
        range: ByteRange,
        /// Bytes the range should contain.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// A worker task ended without reporting a result.
    #[error("worker for {url} (range {}) stopped unexpectedly", display_range(.range))]
    WorkerPanicked {
        /// The URL being fetched.
        url: String,
        /// The worker's range, `None` for an unranged fetch.
        range: Option<ByteRange>,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The background runtime could not be started.
    #[error("failed to start download runtime: {source}")]
    Runtime {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// File system error while writing to a sink.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or not HTTP(S).
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Caller-supplied headers contained a header the downloader manages itself.
    #[error("header {name} is reserved by the downloader and must not be set by the caller")]
    ReservedHeader {
        /// The offending header name.
        name: String,
    },

    /// The proxy URL is malformed or uses an unsupported scheme.
    #[error("invalid proxy: {proxy}")]
    InvalidProxy {
        /// The rejected proxy string.
        proxy: String,
    },

    /// Worker limits or other options are out of range.
    #[error("invalid options: {reason}")]
    InvalidOptions {
        /// Why the options were rejected.
        reason: String,
    },

    /// The save target cannot be written.
    #[error("invalid save target {path}: {reason}")]
    InvalidTarget {
        /// The rejected path.
        path: PathBuf,
        /// Why the path was rejected.
        reason: &'static str,
    },

    /// The transfer was stopped by its owner.
    #[error("download of {url} was cancelled")]
    Cancelled {
        /// The URL whose transfer was cancelled.
        url: String,
    },

    /// The downloader was closed and no longer accepts work.
    #[error("downloader is closed")]
    Closed,
}

#[allow(clippy::ref_option)]
fn display_range(range: &Option<ByteRange>) -> String {
    range.map_or_else(|| "unranged".to_string(), |r| r.to_string())
}

impl DownloadError {
    /// Creates a network error from a reqwest error, mapping timeouts to [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a mid-stream body error attributed to one worker.
    ///
    /// Body timeouts stay in [`Self::Stream`] so the worker's range is kept;
    /// use [`is_timeout`](Self::is_timeout) to classify them.
    pub fn stream(url: impl Into<String>, range: Option<ByteRange>, source: reqwest::Error) -> Self {
        Self::Stream {
            url: url.into(),
            range,
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an error for a ranged request the server did not honour.
    pub fn range_not_honored(url: impl Into<String>, range: ByteRange, status: u16) -> Self {
        Self::RangeNotHonored {
            url: url.into(),
            range,
            status,
        }
    }

    /// Creates an error for a 206 response covering the wrong bytes.
    pub fn content_range_mismatch(
        url: impl Into<String>,
        range: ByteRange,
        content_range: impl Into<String>,
    ) -> Self {
        Self::ContentRangeMismatch {
            url: url.into(),
            range,
            content_range: content_range.into(),
        }
    }

    /// Creates a byte-count mismatch error for one worker.
    pub fn truncated(url: impl Into<String>, range: ByteRange, actual: u64) -> Self {
        Self::Truncated {
            url: url.into(),
            range,
            expected: range.len(),
            actual,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid options error.
    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }

    /// Creates an invalid save target error.
    pub fn invalid_target(path: impl Into<PathBuf>, reason: &'static str) -> Self {
        Self::InvalidTarget {
            path: path.into(),
            reason,
        }
    }

    /// Creates a cancellation marker for `url`.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// True when the transfer was stopped deliberately rather than failing.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// True for a request timeout or a body read that timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Stream { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// The worker range an error is attributed to, if any.
    #[must_use]
    pub fn range(&self) -> Option<ByteRange> {
        match self {
            Self::Stream { range, .. } | Self::WorkerPanicked { range, .. } => *range,
            Self::RangeNotHonored { range, .. }
            | Self::ContentRangeMismatch { range, .. }
            | Self::Truncated { range, .. } => Some(*range),
            _ => None,
        }
    }

    /// True for caller errors rejected before any network call.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. }
                | Self::ReservedHeader { .. }
                | Self::InvalidProxy { .. }
                | Self::InvalidOptions { .. }
                | Self::InvalidTarget { .. }
        )
    }
}

// Note on From trait implementations:
// We do NOT implement `From<reqwest::Error>` or `From<std::io::Error>`
// because our error variants require context (url, range, path) that the
// source errors don't provide. Use the helper constructors instead.
