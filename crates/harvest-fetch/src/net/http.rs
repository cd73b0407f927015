use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::{FetchError, Result};

/// A boxed stream type for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Status, headers and a streaming body of one HTTP exchange.
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: BoxStream<'static, Result<Bytes>>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    /// Buffer the whole body, failing once it grows past `limit` bytes.
    pub async fn collect(mut self, limit: usize) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > limit {
                return Err(FetchError::LimitExceeded {
                    limit: limit as u64,
                    attempted: (buf.len() + chunk.len()) as u64,
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// Asynchronous HTTP client abstraction.
///
/// Implementations must NOT follow redirects: a 3xx comes back as-is so the
/// caller can validate every hop. Connect and read timeouts belong to the
/// implementation.
///
/// # Implementations
///
/// - [`ReqwestClient`]: Production implementation using `reqwest`
/// - `MockHttpClient` behind the `test-utils` feature
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue a GET and return once response headers have arrived.
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse>;
}

/// Timeouts and identity of the production client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(60),
            user_agent: concat!("harvest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use super::*;

    /// Production HTTP client implementation using reqwest.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        pub fn new(options: &HttpClientOptions) -> Result<Self> {
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .connect_timeout(options.connect_timeout)
                .read_timeout(options.read_timeout)
                .user_agent(options.user_agent.clone())
                .build()
                .map_err(|e| FetchError::Connect(format!("failed to build HTTP client: {e}")))?;
            Ok(Self { client })
        }
    }

    pub(crate) fn map_error(err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_body() || err.is_decode() {
            FetchError::Body(err.to_string())
        } else if err.is_builder() {
            FetchError::InvalidRequest(err.to_string())
        } else {
            FetchError::Connect(err.to_string())
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
            let mut request = self.client.get(url);
            for (key, value) in headers {
                request = request.header(key, value);
            }

            let response = request.send().await.map_err(map_error)?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes_stream().map(|chunk| chunk.map_err(map_error));

            Ok(HttpResponse::new(status, headers, Box::pin(body)))
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestClient;

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn response(chunks: Vec<&'static [u8]>) -> HttpResponse {
        let body = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))));
        HttpResponse::new(
            200,
            vec![("Content-Length".into(), " 5 ".into()), ("Location".into(), "/x".into())],
            Box::pin(body),
        )
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let resp = response(vec![]);
        assert_eq!(resp.header("location"), Some("/x"));
        assert_eq!(resp.header("LOCATION"), Some("/x"));
        assert_eq!(resp.content_length(), Some(5));
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn test_collect_within_limit() {
        let body = response(vec![b"hel", b"lo"]).collect(5).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[cfg(feature = "reqwest")]
    #[test]
    fn test_malformed_header_is_not_blocked_url() {
        let err = reqwest::Client::new()
            .get("https://example.org/")
            .header("x-token", "line\nbreak")
            .build()
            .unwrap_err();
        let mapped = reqwest_impl::map_error(err);
        assert!(matches!(mapped, FetchError::InvalidRequest(_)));
        assert_eq!(mapped.kind(), crate::ErrorKind::MissingConfiguration);
    }

    #[tokio::test]
    async fn test_collect_over_limit() {
        let err = response(vec![b"hel", b"lo!"]).collect(5).await.unwrap_err();
        assert!(matches!(err, FetchError::LimitExceeded { limit: 5, attempted: 6 }));
    }
}
