//! The chunk fetcher: one GET, optionally for one byte range, read
//! incrementally into offset-tagged chunks.
//!
//! A ranged request must come back as `206 Partial Content` for exactly the
//! requested bytes, and the body must contain exactly `range.len()` bytes.
//! The only `200 OK` accepted for a ranged request is the one-worker case
//! where the range is the whole resource.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};
use reqwest::StatusCode;
use reqwest::header::CONTENT_RANGE;
use tracing::{debug, instrument};

use super::client::HttpClient;
use super::error::DownloadError;
use super::options::RequestOptions;
use super::plan::ByteRange;

/// One delivered unit of payload tagged with its absolute offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Absolute position of `data[0]` in the resource.
    pub offset: u64,
    /// Payload bytes.
    pub data: Bytes,
}

impl Chunk {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// True for an empty payload (never produced by the fetcher).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte of the chunk.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Reads one response body as a sequence of [`Chunk`]s.
pub struct ChunkFetcher {
    url: String,
    range: Option<ByteRange>,
    body: BodyStream,
    buffer: BytesMut,
    chunk_size: usize,
    offset: u64,
    received: u64,
    body_done: bool,
}

impl std::fmt::Debug for ChunkFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFetcher")
            .field("url", &self.url)
            .field("range", &self.range)
            .field("offset", &self.offset)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

impl ChunkFetcher {
    /// Sends the GET and validates the response headers.
    ///
    /// `accept_full_body` allows a `200 OK` for a ranged request; only pass
    /// `true` when `range` spans the entire resource.
    ///
    /// # Errors
    ///
    /// Transport and status errors from [`HttpClient::get`], plus
    /// [`DownloadError::RangeNotHonored`] and
    /// [`DownloadError::ContentRangeMismatch`] for ranged requests.
    #[instrument(level = "debug", skip(client, options), fields(url = %url, range = ?range))]
    pub async fn open(
        client: &HttpClient,
        url: &str,
        range: Option<ByteRange>,
        options: &RequestOptions,
        chunk_size: usize,
        accept_full_body: bool,
    ) -> Result<Self, DownloadError> {
        let response = client.get(url, range, options).await?;
        if let Some(range) = range {
            check_range_response(url, range, &response, accept_full_body)?;
        }
        debug!(status = response.status().as_u16(), "worker response accepted");

        Ok(Self {
            url: url.to_string(),
            range,
            body: Box::pin(response.bytes_stream()),
            buffer: BytesMut::new(),
            chunk_size: chunk_size.max(1),
            offset: range.map_or(0, |r| r.start),
            received: 0,
            body_done: false,
        })
    }

    /// The range this fetcher was opened for.
    #[must_use]
    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    /// Returns the next chunk, or `None` once the body ended cleanly.
    ///
    /// Chunks are `chunk_size` bytes except possibly the last one.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Stream`] when the body fails mid-read and
    /// [`DownloadError::Truncated`] when a ranged body is shorter or longer
    /// than its range.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, DownloadError> {
        loop {
            if self.buffer.len() >= self.chunk_size {
                let data = self.buffer.split_to(self.chunk_size).freeze();
                return Ok(Some(self.emit(data)));
            }
            if self.body_done {
                if !self.buffer.is_empty() {
                    let data = self.buffer.split().freeze();
                    return Ok(Some(self.emit(data)));
                }
                return self.finish().map(|()| None);
            }

            match self.body.next().await {
                Some(Ok(bytes)) => {
                    self.received += bytes.len() as u64;
                    if let Some(range) = self.range
                        && self.received > range.len()
                    {
                        return Err(DownloadError::truncated(&self.url, range, self.received));
                    }
                    self.buffer.extend_from_slice(&bytes);
                }
                Some(Err(e)) => return Err(DownloadError::stream(&self.url, self.range, e)),
                None => self.body_done = true,
            }
        }
    }

    /// Turns the fetcher into a lazy stream of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Chunk, DownloadError>> + Send {
        stream::try_unfold(self, |mut fetcher| async move {
            Ok(fetcher.next_chunk().await?.map(|chunk| (chunk, fetcher)))
        })
    }

    fn emit(&mut self, data: Bytes) -> Chunk {
        let chunk = Chunk {
            offset: self.offset,
            data,
        };
        self.offset = chunk.end();
        chunk
    }

    fn finish(&self) -> Result<(), DownloadError> {
        if let Some(range) = self.range
            && self.received != range.len()
        {
            return Err(DownloadError::truncated(&self.url, range, self.received));
        }
        debug!(url = %self.url, range = ?self.range, bytes = self.received, "worker body complete");
        Ok(())
    }
}

fn check_range_response(
    url: &str,
    range: ByteRange,
    response: &reqwest::Response,
    accept_full_body: bool,
) -> Result<(), DownloadError> {
    let status = response.status();
    if status == StatusCode::OK && accept_full_body {
        return Ok(());
    }
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::range_not_honored(url, range, status.as_u16()));
    }

    let Some(raw) = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(());
    };
    match parse_content_range(raw) {
        Some((start, end)) if start == range.start && end == range.end => Ok(()),
        _ => Err(DownloadError::content_range_mismatch(url, range, raw)),
    }
}

/// Parses `bytes <start>-<end>/<total|*>` into `(start, end)`.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, _total) = spec.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::download::DownloaderConfig;
    use crate::test_support::range_server::{RangeResponder, mount_resource, pattern_body};
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use futures_util::TryStreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::from_config(&DownloaderConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_content_range_variants() {
        assert_eq!(parse_content_range("bytes 0-99/1000"), Some((0, 99)));
        assert_eq!(parse_content_range("bytes 10-19/*"), Some((10, 19)));
        assert_eq!(parse_content_range("bytes */1000"), None);
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[test]
    fn test_chunk_len_and_end() {
        let chunk = Chunk {
            offset: 100,
            data: Bytes::from_static(b"abcd"),
        };
        assert_eq!(chunk.len(), 4);
        assert_eq!(chunk.end(), 104);
        assert!(!chunk.is_empty());
    }

    #[tokio::test]
    async fn test_ranged_fetch_offsets_are_contiguous_from_range_start() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let body = pattern_body(1000);
        mount_resource(&mock_server, "/data.bin", RangeResponder::new(body.clone())).await;

        let url = format!("{}/data.bin", mock_server.uri());
        let range = ByteRange::new(100, 349);
        let fetcher = ChunkFetcher::open(
            &client(),
            &url,
            Some(range),
            &RequestOptions::default(),
            64,
            false,
        )
        .await
        .unwrap();
        let chunks: Vec<Chunk> = fetcher.into_stream().try_collect().await.unwrap();

        assert_eq!(chunks.first().unwrap().offset, 100);
        assert_eq!(chunks.last().unwrap().end(), 350);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset);
        }
        assert!(chunks.iter().all(|c| c.len() <= 64));
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.to_vec()).collect();
        assert_eq!(joined, body[100..350]);
    }

    #[tokio::test]
    async fn test_unranged_fetch_starts_at_zero() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&mock_server)
            .await;

        let url = format!("{}/stream", mock_server.uri());
        let fetcher =
            ChunkFetcher::open(&client(), &url, None, &RequestOptions::default(), 4, false)
                .await
                .unwrap();
        let chunks: Vec<Chunk> = fetcher.into_stream().try_collect().await.unwrap();
        let offsets: Vec<u64> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(chunks.last().unwrap().end(), 11);
    }

    #[tokio::test]
    async fn test_ranged_fetch_rejects_full_200_response() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_resource(
            &mock_server,
            "/norange.bin",
            RangeResponder::new(pattern_body(100)).ignore_ranges(),
        )
        .await;

        let url = format!("{}/norange.bin", mock_server.uri());
        let result = ChunkFetcher::open(
            &client(),
            &url,
            Some(ByteRange::new(50, 99)),
            &RequestOptions::default(),
            16,
            false,
        )
        .await;
        match result {
            Err(DownloadError::RangeNotHonored { status, range, .. }) => {
                assert_eq!(status, 200);
                assert_eq!(range, ByteRange::new(50, 99));
            }
            other => panic!("Expected RangeNotHonored, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_full_range_accepts_200_response() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_resource(
            &mock_server,
            "/whole.bin",
            RangeResponder::new(pattern_body(100)).ignore_ranges(),
        )
        .await;

        let url = format!("{}/whole.bin", mock_server.uri());
        let fetcher = ChunkFetcher::open(
            &client(),
            &url,
            Some(ByteRange::new(0, 99)),
            &RequestOptions::default(),
            1024,
            true,
        )
        .await
        .unwrap();
        let chunks: Vec<Chunk> = fetcher.into_stream().try_collect().await.unwrap();
        assert_eq!(chunks.iter().map(Chunk::len).sum::<u64>(), 100);
    }

    #[tokio::test]
    async fn test_wrong_content_range_is_rejected() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/shifted"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-9/100")
                    .set_body_bytes(vec![0u8; 10]),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/shifted", mock_server.uri());
        let result = ChunkFetcher::open(
            &client(),
            &url,
            Some(ByteRange::new(10, 19)),
            &RequestOptions::default(),
            16,
            false,
        )
        .await;
        assert!(matches!(
            result,
            Err(DownloadError::ContentRangeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_short_body_is_truncated_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/short"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 5]))
            .mount(&mock_server)
            .await;

        let url = format!("{}/short", mock_server.uri());
        let fetcher = ChunkFetcher::open(
            &client(),
            &url,
            Some(ByteRange::new(0, 9)),
            &RequestOptions::default(),
            16,
            false,
        )
        .await
        .unwrap();
        let result: Result<Vec<Chunk>, _> = fetcher.into_stream().try_collect().await;
        match result {
            Err(DownloadError::Truncated {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 10);
                assert_eq!(actual, 5);
            }
            other => panic!("Expected Truncated, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ranged_fetch_error_status_propagates() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/boom"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let url = format!("{}/boom", mock_server.uri());
        let result = ChunkFetcher::open(
            &client(),
            &url,
            Some(ByteRange::new(0, 9)),
            &RequestOptions::default(),
            16,
            false,
        )
        .await;
        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 503, .. })
        ));
    }
}
