//! A `wiremock` responder that serves one in-memory resource and honours
//! `Range: bytes=<start>-<end>` the way a real file server does.

use std::time::Duration;

use wiremock::matchers::path;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-per-256 payload so misplaced bytes show up.
#[must_use]
pub fn pattern_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// Serves `body` for HEAD and (ranged) GET requests.
#[derive(Debug, Clone)]
pub struct RangeResponder {
    body: Vec<u8>,
    ignore_ranges: bool,
    advertise_length: bool,
    fail_range_start: Option<u64>,
    short_by: usize,
    delay: Option<Duration>,
}

impl RangeResponder {
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ignore_ranges: false,
            advertise_length: true,
            fail_range_start: None,
            short_by: 0,
            delay: None,
        }
    }

    /// Answer every GET with `200` and the full body.
    #[must_use]
    pub fn ignore_ranges(mut self) -> Self {
        self.ignore_ranges = true;
        self
    }

    /// Answer HEAD without a usable `Content-Length`.
    #[must_use]
    pub fn hide_length(mut self) -> Self {
        self.advertise_length = false;
        self
    }

    /// Answer `500` for the range starting at `start`.
    #[must_use]
    pub fn fail_range_at(mut self, start: u64) -> Self {
        self.fail_range_start = Some(start);
        self
    }

    /// Send `bytes` fewer than requested for every ranged GET.
    #[must_use]
    pub fn short_by(mut self, bytes: usize) -> Self {
        self.short_by = bytes;
        self
    }

    /// Delay every GET response.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn template(&self, status: u16) -> ResponseTemplate {
        let template = ResponseTemplate::new(status);
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }

    fn respond_head(&self) -> ResponseTemplate {
        if !self.advertise_length {
            return ResponseTemplate::new(200);
        }
        ResponseTemplate::new(200)
            .insert_header("Content-Length", self.body.len().to_string().as_str())
            .insert_header("Accept-Ranges", "bytes")
    }

    fn respond_get(&self, request: &Request) -> ResponseTemplate {
        let requested = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_header);

        let Some((start, end)) = requested.filter(|_| !self.ignore_ranges) else {
            return self.template(200).set_body_bytes(self.body.clone());
        };
        if self.fail_range_start == Some(start) {
            return self.template(500);
        }

        let total = self.body.len() as u64;
        if start >= total || end < start {
            return ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{total}").as_str());
        }
        let end = end.min(total - 1);
        let slice_end = usize::try_from(end + 1)
            .unwrap_or(self.body.len())
            .saturating_sub(self.short_by);
        let slice_start = usize::try_from(start).unwrap_or(0).min(slice_end);

        self.template(206)
            .insert_header(
                "Content-Range",
                format!("bytes {start}-{end}/{total}").as_str(),
            )
            .set_body_bytes(self.body[slice_start..slice_end].to_vec())
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if request.method.as_str() == "HEAD" {
            self.respond_head()
        } else {
            self.respond_get(request)
        }
    }
}

fn parse_range_header(value: &str) -> Option<(u64, u64)> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = if end.trim().is_empty() {
        u64::MAX
    } else {
        end.trim().parse().ok()?
    };
    Some((start, end))
}

/// Mounts `responder` for every method on `route`.
pub async fn mount_resource(server: &MockServer, route: &str, responder: RangeResponder) {
    Mock::given(path(route))
        .respond_with(responder)
        .mount(server)
        .await;
}
