//! In-memory HTTP client for tests.
//!
//! Responses are queued per URL; each request takes the next one and the last
//! queued response keeps answering. Unknown URLs get a 404.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;

use crate::error::{FetchError, Result};
use crate::net::{HttpClient, HttpResponse};

/// A request seen by [`MockHttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedCall {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Fixed,
    // honours `Range: bytes=N-`
    Ranged,
}

/// One canned response.
#[derive(Debug, Clone)]
pub struct MockRoute {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
    mode: Mode,
    fail_after: Option<usize>,
    with_length: bool,
}

impl MockRoute {
    fn new(status: u16, body: Bytes) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
            mode: Mode::Fixed,
            fail_after: None,
            with_length: true,
        }
    }

    /// 200 with `body`, ignoring any `Range`.
    pub fn ok(body: &[u8]) -> Self { Self::new(200, Bytes::copy_from_slice(body)) }

    /// 200 JSON document.
    pub fn json(body: &str) -> Self {
        Self::ok(body.as_bytes()).header("content-type", "application/json")
    }

    pub fn status(status: u16) -> Self { Self::new(status, Bytes::new()) }

    /// 302 to `location`.
    pub fn redirect(location: &str) -> Self { Self::status(302).header("location", location) }

    /// 206 with a fixed `Content-Range`, whatever was asked for.
    pub fn partial(body: &[u8], content_range: &str) -> Self {
        Self::new(206, Bytes::copy_from_slice(body)).header("content-range", content_range)
    }

    /// Serves `body`, answering range requests with 206 (or 416 past the end).
    pub fn ranged(body: &[u8]) -> Self {
        Self {
            mode: Mode::Ranged,
            ..Self::ok(body)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Break the body stream after `bytes` bytes.
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    /// Omit `Content-Length`.
    pub fn without_length(mut self) -> Self {
        self.with_length = false;
        self
    }

    fn respond(&self, request_headers: &[(String, String)]) -> HttpResponse {
        let mut status = self.status;
        let mut headers = self.headers.clone();
        let mut body = self.body.clone();

        if self.mode == Mode::Ranged {
            let range = request_headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("range"))
                .map(|(_, v)| v.as_str());
            let total = self.body.len();
            let offset = range
                .and_then(|r| r.strip_prefix("bytes="))
                .and_then(|r| r.strip_suffix('-'))
                .and_then(|r| r.parse::<usize>().ok());
            match (range, offset) {
                (Some(_), Some(offset)) if offset < total => {
                    status = 206;
                    headers.push((
                        "content-range".to_string(),
                        format!("bytes {}-{}/{}", offset, total - 1, total),
                    ));
                    body = self.body.slice(offset..);
                }
                (Some(_), _) => {
                    status = 416;
                    headers.push(("content-range".to_string(), format!("bytes */{total}")));
                    body = Bytes::new();
                }
                (None, _) => {}
            }
        }

        if self.with_length {
            headers.push(("content-length".to_string(), body.len().to_string()));
        }

        let chunks: Vec<Result<Bytes>> = match self.fail_after {
            Some(n) => vec![
                Ok(body.slice(..n.min(body.len()))),
                Err(FetchError::Body("connection reset by mock".to_string())),
            ],
            None if body.is_empty() => Vec::new(),
            None => vec![Ok(body)],
        };
        HttpResponse::new(status, headers, Box::pin(stream::iter(chunks)))
    }
}

/// Scriptable [`HttpClient`] that records every request.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    routes: Mutex<HashMap<String, VecDeque<MockRoute>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockHttpClient {
    pub fn new() -> Self { Self::default() }

    /// Queue `route` as the next response for `url`.
    pub fn route(&self, url: &str, route: MockRoute) {
        self.routes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(url.to_string())
            .or_default()
            .push_back(route);
    }

    pub fn calls(&self) -> Vec<RecordedCall> { self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone() }

    pub fn call_count(&self, url: &str) -> usize { self.calls().iter().filter(|c| c.url == url).count() }

    fn next_route(&self, url: &str) -> Option<MockRoute> {
        let mut routes = self.routes.lock().unwrap_or_else(|p| p.into_inner());
        let queue = routes.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedCall {
                url: url.to_string(),
                headers: headers.to_vec(),
            });
        let response = match self.next_route(url) {
            Some(route) => route.respond(headers),
            None => MockRoute::status(404).respond(headers),
        };
        Ok(response)
    }
}
