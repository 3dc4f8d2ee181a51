//! Size discovery with a metadata-only request.
//!
//! The probe never fails a transfer for lack of a length: a missing,
//! unparsable or zero `Content-Length` (or a HEAD rejected with an error
//! status) degrades to [`ResourceSize::Unknown`]. Transport failures do fail.

use reqwest::header::{CONTENT_LENGTH, HeaderValue};
use serde::Serialize;
use tracing::{debug, instrument};

use super::client::HttpClient;
use super::error::DownloadError;
use super::options::RequestOptions;

/// Total size of a remote resource as far as the probe could tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSize {
    /// Declared length in bytes; always non-zero.
    Known(u64),
    /// No usable length; the resource is fetched by a single unranged worker.
    Unknown,
}

impl ResourceSize {
    /// Interprets a `Content-Length` header value.
    #[must_use]
    pub fn from_content_length(value: Option<&HeaderValue>) -> Self {
        value
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|len| *len > 0)
            .map_or(Self::Unknown, Self::Known)
    }

    /// The known length, if any.
    #[must_use]
    pub fn known(self) -> Option<u64> {
        match self {
            Self::Known(len) => Some(len),
            Self::Unknown => None,
        }
    }

    /// Length for planning purposes, `0` meaning unknown.
    #[must_use]
    pub fn as_plan_len(self) -> u64 {
        self.known().unwrap_or(0)
    }
}

/// Discovers the size of `url` with a HEAD request.
///
/// # Errors
///
/// Returns [`DownloadError::Network`] or [`DownloadError::Timeout`] when the
/// request cannot be completed at the transport level.
#[instrument(skip(client, options), fields(url = %url))]
pub async fn probe(
    client: &HttpClient,
    url: &str,
    options: &RequestOptions,
) -> Result<ResourceSize, DownloadError> {
    let response = client.head(url, options).await?;
    let status = response.status();
    if !status.is_success() {
        debug!(status = status.as_u16(), "HEAD not successful; size unknown");
        return Ok(ResourceSize::Unknown);
    }

    let size = ResourceSize::from_content_length(response.headers().get(CONTENT_LENGTH));
    debug!(?size, "probed resource size");
    Ok(size)
}
