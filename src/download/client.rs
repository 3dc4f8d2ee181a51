//! HTTP client wrapper shared by the prober and the range workers.
//!
//! One `HttpClient` owns a pooled `reqwest::Client`; cloning it shares the
//! pool. Transfers that ask for a proxy get a dedicated client built from the
//! same settings.

use std::time::Duration;

use reqwest::header::RANGE;
use reqwest::{Client, ClientBuilder, Method, Proxy, Response};
use tracing::{debug, instrument};

use super::error::DownloadError;
use super::options::{DownloaderConfig, RequestOptions};
use super::plan::ByteRange;
use crate::user_agent;

/// HTTP client for probing and fetching byte ranges.
///
/// This client is designed to be created once and reused for many transfers,
/// taking advantage of connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpClient {
    /// Creates a client using the timeouts in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the TLS backend cannot be initialised.
    pub fn from_config(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        Self::with_timeouts(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.read_timeout_secs),
        )
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the client cannot be built.
    #[instrument(level = "debug")]
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, DownloadError> {
        let client = base_client_builder(connect_timeout, read_timeout)
            .build()
            .map_err(|source| DownloadError::Client { source })?;
        Ok(Self {
            client,
            connect_timeout,
            read_timeout,
        })
    }

    /// Returns a client for a transfer with `options`.
    ///
    /// Without a proxy this is a clone sharing the connection pool; with one,
    /// a dedicated client routed through the proxy.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidProxy`] if reqwest rejects the proxy URL.
    pub fn for_options(&self, options: &RequestOptions) -> Result<Self, DownloadError> {
        let Some(proxy) = options.proxy.as_deref() else {
            return Ok(self.clone());
        };
        let resolved = Proxy::all(proxy).map_err(|_| DownloadError::InvalidProxy {
            proxy: proxy.to_string(),
        })?;
        debug!(proxy, "building dedicated client for proxied transfer");
        let client = base_client_builder(self.connect_timeout, self.read_timeout)
            .proxy(resolved)
            .build()
            .map_err(|source| DownloadError::Client { source })?;
        Ok(Self {
            client,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        })
    }

    /// Sends a HEAD request and returns the response whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`] or [`DownloadError::Timeout`] for
    /// transport failures.
    pub async fn head(&self, url: &str, options: &RequestOptions) -> Result<Response, DownloadError> {
        self.send_request(Method::HEAD, url, options, None).await
    }

    /// Sends a GET, optionally for one byte range, and requires a success status.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HttpStatus`] for non-2xx responses, plus the
    /// transport errors of [`head`](Self::head).
    pub async fn get(
        &self,
        url: &str,
        range: Option<ByteRange>,
        options: &RequestOptions,
    ) -> Result<Response, DownloadError> {
        let response = self.send_request(Method::GET, url, options, range).await?;
        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }
        Ok(response)
    }

    async fn send_request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
        range: Option<ByteRange>,
    ) -> Result<Response, DownloadError> {
        let mut request = self
            .client
            .request(method, url)
            .headers(options.headers.clone());
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))
    }
}

fn base_client_builder(connect_timeout: Duration, read_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .user_agent(user_agent::default_download_user_agent())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::from_config(&DownloaderConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_get_sends_range_header_for_ranged_request() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/part"))
            .and(header("range", "bytes=5-9"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"56789"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/part", mock_server.uri());
        let response = client()
            .get(&url, Some(ByteRange::new(5, 9)), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 206);
    }

    #[tokio::test]
    async fn test_get_forwards_caller_headers() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/auth"))
            .and(header("x-token", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let options = RequestOptions::new().with_header("X-Token", "secret").unwrap();
        let url = format!("{}/auth", mock_server.uri());
        let response = client().get(&url, None, &options).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_get_non_success_is_http_status_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/missing", mock_server.uri());
        let result = client().get(&url, None, &RequestOptions::default()).await;
        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_user_agent_is_sent() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/ua"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/ua", mock_server.uri());
        let response = client().head(&url, &RequestOptions::default()).await.unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let result = client()
            .head("http://127.0.0.1:9/file", &RequestOptions::default())
            .await;
        assert!(
            matches!(
                result,
                Err(DownloadError::Network { .. } | DownloadError::Timeout { .. })
            ),
            "Expected transport error, got: {result:?}"
        );
    }

    #[test]
    fn test_for_options_without_proxy_shares_settings() {
        let base = client();
        let derived = base.for_options(&RequestOptions::default()).unwrap();
        assert_eq!(derived.connect_timeout, base.connect_timeout);
        assert_eq!(derived.read_timeout, base.read_timeout);
    }

    #[test]
    fn test_for_options_with_proxy_builds_dedicated_client() {
        let options = RequestOptions::new().with_proxy("http://127.0.0.1:3128");
        assert!(client().for_options(&options).is_ok());
    }
}
