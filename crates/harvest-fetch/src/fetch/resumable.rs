use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Pacing, PartWriter, drop_part, part_len, verify_and_publish};
use crate::core::{RetryPolicy, is_redirect, parse_content_range_start, range_header, url_authority};
use crate::data::{TransferOptions, TransferOutcome, TransferRequest};
use crate::error::{FetchError, Result};
use crate::net::{HttpClient, HttpResponse, UrlSafetyValidator};
use crate::rate::{Clock, SystemClock, TokenBucket};

/// One HTTP(S) object onto disk: range resume into `<dest>.part`, manual
/// redirect following with per-hop SSRF checks, size and checksum validation,
/// then an atomic rename onto `dest`.
///
/// Transient failures are retried per [`RetryPolicy`]. Validation failures
/// delete the part file; a cancelled transfer leaves it for the next run.
pub struct ResumableTransfer {
    client: Arc<dyn HttpClient>,
    validator: Arc<UrlSafetyValidator>,
    options: TransferOptions,
    pacing: Pacing,
}

struct Exchange {
    response: HttpResponse,
    chain: Vec<String>,
}

impl ResumableTransfer {
    pub fn new(client: Arc<dyn HttpClient>, validator: Arc<UrlSafetyValidator>) -> Self {
        Self {
            client,
            validator,
            options: TransferOptions::default(),
            pacing: Pacing {
                retry: RetryPolicy::default(),
                clock: Arc::new(SystemClock::new()),
                stop: CancellationToken::new(),
                limiter: None,
            },
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.pacing.retry = retry;
        self
    }

    pub fn with_limiter(mut self, limiter: Option<Arc<TokenBucket>>) -> Self {
        self.pacing.limiter = limiter;
        self
    }

    /// Clock used for backoff sleeps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.pacing.clock = clock;
        self
    }

    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.pacing.stop = stop;
        self
    }

    /// Fetch `request`, never writing more than `max_bytes` in total.
    pub async fn fetch(&self, request: &TransferRequest, max_bytes: Option<u64>) -> Result<TransferOutcome> {
        let part = harvest_fs::part_path(&request.dest)?;
        if let Some(parent) = request.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut fresh = !self.options.resume;
        let mut attempt = 1u32;
        loop {
            self.pacing.admit().await?;
            let err = match self.attempt(request, &part, fresh, max_bytes).await {
                Ok(outcome) => {
                    tracing::info!(
                        url = %request.url,
                        path = %outcome.path.display(),
                        bytes = outcome.bytes,
                        resumed_from = outcome.resumed_from,
                        "transfer complete"
                    );
                    return Ok(outcome);
                }
                Err(err) => err,
            };

            if matches!(err, FetchError::ProtocolViolation(_)) {
                drop_part(&part);
                fresh = true;
            }
            if self.pacing.retry.is_retryable(&err, attempt) {
                tracing::warn!(url = %request.url, attempt, error = %err, "transfer attempt failed, retrying");
                self.pacing.backoff(attempt).await?;
                attempt += 1;
                continue;
            }
            if !err.keeps_partial() {
                drop_part(&part);
            }
            tracing::debug!(url = %request.url, attempt, error = %err, "transfer failed");
            return Err(err);
        }
    }

    async fn attempt(
        &self,
        request: &TransferRequest,
        part: &Path,
        fresh: bool,
        max_bytes: Option<u64>,
    ) -> Result<TransferOutcome> {
        let requested = if fresh { 0 } else { part_len(part).await };
        if let Some(limit) = max_bytes {
            if requested > limit {
                return Err(FetchError::LimitExceeded {
                    limit,
                    attempted: requested,
                });
            }
        }

        let Exchange { mut response, chain } = self.follow(request, requested).await?;
        let final_url = chain.last().cloned().unwrap_or_else(|| request.url.clone());

        let offset = match response.status {
            206 => {
                let start = response.header("content-range").and_then(parse_content_range_start);
                if start != Some(requested) {
                    return Err(FetchError::ProtocolViolation(format!(
                        "asked for range from {requested}, server sent {:?}",
                        response.header("content-range")
                    )));
                }
                requested
            }
            200..=299 => {
                if requested > 0 {
                    tracing::debug!(url = %final_url, "range ignored by server, restarting from zero");
                }
                0
            }
            416 if requested > 0 => {
                return Err(FetchError::ProtocolViolation(format!(
                    "range from {requested} not satisfiable"
                )));
            }
            status => {
                return Err(FetchError::HttpStatus {
                    status,
                    url: final_url,
                });
            }
        };

        let announced = response.content_length();
        if let (Some(limit), Some(len)) = (max_bytes, announced) {
            let total = offset.saturating_add(len);
            if total > limit {
                return Err(FetchError::LimitExceeded {
                    limit,
                    attempted: total,
                });
            }
        }

        let mut writer = PartWriter::open(part, offset, max_bytes).await?;
        if let Err(err) = self.stream_body(&mut response, &mut writer).await {
            writer.settle().await;
            return Err(err);
        }
        if let Some(len) = announced {
            let received = writer.written() - offset;
            if received < len {
                writer.settle().await;
                return Err(FetchError::Body(format!("body ended after {received} of {len} bytes")));
            }
        }
        let (written, sha256) = writer.finish().await?;

        self.validator.validate_chain(&chain).await?;
        let path = verify_and_publish(part, request, written, &sha256, self.options.verify_checksums)?;

        Ok(TransferOutcome {
            path,
            resolved_url: final_url,
            redirect_chain: chain,
            bytes: written,
            sha256,
            resumed_from: offset,
        })
    }

    async fn stream_body(&self, response: &mut HttpResponse, writer: &mut PartWriter) -> Result<()> {
        loop {
            let next = tokio::select! {
                _ = self.pacing.stop.cancelled() => return Err(FetchError::Cancelled),
                next = response.body.next() => next,
            };
            match next {
                Some(chunk) => writer.write(&chunk?).await?,
                None => return Ok(()),
            }
        }
    }

    // GET with manual redirects; every hop is checked before it is requested.
    async fn follow(&self, request: &TransferRequest, offset: u64) -> Result<Exchange> {
        self.validator.check(&request.url).await?;
        let origin = Url::parse(&request.url).ok().and_then(|u| url_authority(&u));

        let mut url = request.url.clone();
        let mut chain = vec![url.clone()];
        let mut redirects = 0usize;
        loop {
            let current = Url::parse(&url).map_err(|e| FetchError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            let same_origin = url_authority(&current) == origin;
            let mut headers: Vec<(String, String)> = request
                .headers
                .iter()
                .filter(|(name, _)| same_origin || !name.eq_ignore_ascii_case("authorization"))
                .cloned()
                .collect();
            if offset > 0 {
                headers.push(("Range".to_string(), range_header(offset)));
            }

            let response = tokio::select! {
                _ = self.pacing.stop.cancelled() => return Err(FetchError::Cancelled),
                response = self.client.get(&url, &headers) => response?,
            };
            if !is_redirect(response.status) {
                return Ok(Exchange { response, chain });
            }

            if redirects >= self.options.max_redirects {
                return Err(FetchError::TooManyRedirects(self.options.max_redirects));
            }
            let next = response
                .header("location")
                .and_then(|location| current.join(location).ok())
                .ok_or_else(|| FetchError::MissingLocation(url.clone()))?;
            self.validator.check(next.as_str()).await?;

            tracing::debug!(from = %url, to = %next, status = response.status, "following redirect");
            url = next.to_string();
            chain.push(url.clone());
            redirects += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::net::{StaticResolver, UrlPolicy};
    use crate::rate::ManualClock;
    use crate::testing::{MockHttpClient, MockRoute};

    const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn validator() -> Arc<UrlSafetyValidator> {
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();
        let resolver = StaticResolver::new()
            .with("a.example", &[ip("93.184.216.34")])
            .with("b.example", &[ip("10.0.0.7")])
            .with("c.example", &[ip("93.184.216.35")]);
        Arc::new(UrlSafetyValidator::new(UrlPolicy::default(), Arc::new(resolver)))
    }

    fn transfer(client: &Arc<MockHttpClient>) -> (ResumableTransfer, ManualClock) {
        let clock = ManualClock::new();
        let transfer = ResumableTransfer::new(client.clone(), validator()).with_clock(Arc::new(clock.clone()));
        (transfer, clock)
    }

    #[tokio::test]
    async fn test_hello_with_matching_sha() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/hello", MockRoute::ok(b"hello"));
        let (transfer, _) = transfer(&client);

        let dest = dir.path().join("hello.txt");
        let request = TransferRequest::new("https://a.example/hello", &dest)
            .expected_sha256(Some(HELLO_SHA.parse().unwrap()));
        let outcome = transfer.fetch(&request, None).await.unwrap();

        assert_eq!(outcome.sha256, HELLO_SHA);
        assert_eq!(outcome.bytes, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert!(!dir.path().join("hello.txt.part").exists());
    }

    #[tokio::test]
    async fn test_sha_mismatch_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/hello", MockRoute::ok(b"hello!"));
        let (transfer, _) = transfer(&client);

        let dest = dir.path().join("hello.txt");
        let request = TransferRequest::new("https://a.example/hello", &dest)
            .expected_sha256(Some(HELLO_SHA.parse().unwrap()));
        let err = transfer.fetch(&request, None).await.unwrap_err();

        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
        assert!(!dest.exists());
        assert!(!dir.path().join("hello.txt.part").exists());
        assert_eq!(client.call_count("https://a.example/hello"), 1);
    }

    #[tokio::test]
    async fn test_resume_matches_full_download() {
        let dir = tempfile::tempdir().unwrap();
        let body: &'static [u8] = b"0123456789abcdefghij";
        let full_sha = hex::encode(harvest_verify::Sha256Hasher::digest(body));

        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/data", MockRoute::ranged(body));
        let (transfer, _) = transfer(&client);

        let dest = dir.path().join("data.bin");
        std::fs::write(dir.path().join("data.bin.part"), &body[..7]).unwrap();
        let outcome = transfer
            .fetch(&TransferRequest::new("https://a.example/data", &dest), None)
            .await
            .unwrap();

        assert_eq!(outcome.resumed_from, 7);
        assert_eq!(outcome.sha256, full_sha);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        let calls = client.calls();
        assert!(calls[0].headers.iter().any(|(k, v)| k == "Range" && v == "bytes=7-"));
    }

    #[tokio::test]
    async fn test_full_body_on_range_request_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/hello", MockRoute::ok(b"hello"));
        let (transfer, _) = transfer(&client);

        let dest = dir.path().join("hello.txt");
        std::fs::write(dir.path().join("hello.txt.part"), b"junk").unwrap();
        let outcome = transfer
            .fetch(&TransferRequest::new("https://a.example/hello", &dest), None)
            .await
            .unwrap();

        assert_eq!(outcome.resumed_from, 0);
        assert_eq!(outcome.sha256, HELLO_SHA);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_wrong_range_start_forces_fresh_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/hello", MockRoute::partial(b"llo", "bytes 2-4/5"));
        client.route("https://a.example/hello", MockRoute::ok(b"hello"));
        let (transfer, clock) = transfer(&client);

        let dest = dir.path().join("hello.txt");
        std::fs::write(dir.path().join("hello.txt.part"), b"hel").unwrap();
        let outcome = transfer
            .fetch(&TransferRequest::new("https://a.example/hello", &dest), None)
            .await
            .unwrap();

        assert_eq!(outcome.sha256, HELLO_SHA);
        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].headers.iter().any(|(k, _)| k == "Range"));
        assert!(!calls[1].headers.iter().any(|(k, _)| k == "Range"));
        assert_eq!(clock.sleeps(), vec![std::time::Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_redirect_through_private_host_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/start", MockRoute::redirect("http://b.example/mid"));
        client.route("http://b.example/mid", MockRoute::redirect("https://c.example/end"));
        client.route("https://c.example/end", MockRoute::ok(b"hello"));
        let (transfer, _) = transfer(&client);

        let dest = dir.path().join("out");
        let err = transfer
            .fetch(&TransferRequest::new("https://a.example/start", &dest), None)
            .await
            .unwrap_err();

        match err {
            FetchError::BlockedUrl { url, .. } => assert_eq!(url, "http://b.example/mid"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.call_count("http://b.example/mid"), 0);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_relative_redirect_followed() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/old/file", MockRoute::redirect("../new/file"));
        client.route("https://a.example/new/file", MockRoute::ok(b"hello"));
        let (transfer, _) = transfer(&client);

        let outcome = transfer
            .fetch(&TransferRequest::new("https://a.example/old/file", dir.path().join("f")), None)
            .await
            .unwrap();
        assert_eq!(outcome.resolved_url, "https://a.example/new/file");
        assert_eq!(outcome.redirect_chain.len(), 2);
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/loop", MockRoute::redirect("https://a.example/loop"));
        let (transfer, _) = transfer(&client);
        let transfer = transfer.with_options(TransferOptions::default().max_redirects(3));

        let err = transfer
            .fetch(&TransferRequest::new("https://a.example/loop", dir.path().join("f")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooManyRedirects(3)));
        assert_eq!(client.call_count("https://a.example/loop"), 4);
    }

    #[tokio::test]
    async fn test_authorization_dropped_across_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::redirect("https://c.example/f"));
        client.route("https://c.example/f", MockRoute::ok(b"hello"));
        let (transfer, _) = transfer(&client);

        let request = TransferRequest::new("https://a.example/f", dir.path().join("f"))
            .header("Authorization", "Bearer secret")
            .header("Accept", "*/*");
        transfer.fetch(&request, None).await.unwrap();

        let calls = client.calls();
        assert!(calls[0].headers.iter().any(|(k, _)| k == "Authorization"));
        assert!(!calls[1].headers.iter().any(|(k, _)| k == "Authorization"));
        assert!(calls[1].headers.iter().any(|(k, _)| k == "Accept"));
    }

    #[tokio::test]
    async fn test_server_error_retried_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::status(503));
        client.route("https://a.example/f", MockRoute::ok(b"hello"));
        let (transfer, clock) = transfer(&client);

        let outcome = transfer
            .fetch(&TransferRequest::new("https://a.example/f", dir.path().join("f")), None)
            .await
            .unwrap();
        assert_eq!(outcome.bytes, 5);
        assert_eq!(client.call_count("https://a.example/f"), 2);
        assert_eq!(clock.total_slept(), std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::status(404));
        let (transfer, _) = transfer(&client);

        let err = transfer
            .fetch(&TransferRequest::new("https://a.example/f", dir.path().join("f")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert_eq!(client.call_count("https://a.example/f"), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::status(500));
        let (transfer, clock) = transfer(&client);

        let err = transfer
            .fetch(&TransferRequest::new("https://a.example/f", dir.path().join("f")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 500, .. }));
        assert_eq!(client.call_count("https://a.example/f"), 3);
        assert_eq!(
            clock.sleeps(),
            vec![std::time::Duration::from_secs(2), std::time::Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_interrupted_body_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let body: &'static [u8] = b"hello";
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::ok(body).fail_after(3));
        client.route("https://a.example/f", MockRoute::ranged(body));
        let (transfer, _) = transfer(&client);

        let outcome = transfer
            .fetch(&TransferRequest::new("https://a.example/f", dir.path().join("f")), None)
            .await
            .unwrap();
        assert_eq!(outcome.resumed_from, 3);
        assert_eq!(outcome.sha256, HELLO_SHA);
    }

    #[tokio::test]
    async fn test_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::ok(b"hello"));
        let (transfer, _) = transfer(&client);

        let dest = dir.path().join("f");
        let request = TransferRequest::new("https://a.example/f", &dest).expected_size(Some(4));
        let err = transfer.fetch(&request, None).await.unwrap_err();
        assert!(matches!(err, FetchError::SizeMismatch { expected: 4, actual: 5 }));
        assert!(!dest.exists());
        assert!(!dir.path().join("f.part").exists());
    }

    #[tokio::test]
    async fn test_limit_rejected_from_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::ok(b"hello"));
        let (transfer, _) = transfer(&client);

        let err = transfer
            .fetch(&TransferRequest::new("https://a.example/f", dir.path().join("f")), Some(4))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::LimitExceeded { limit: 4, attempted: 5 }));
        assert!(!dir.path().join("f.part").exists());
    }

    #[tokio::test]
    async fn test_limit_enforced_without_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::ok(b"hello").without_length());
        let (transfer, _) = transfer(&client);

        let err = transfer
            .fetch(&TransferRequest::new("https://a.example/f", dir.path().join("f")), Some(4))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::LimitExceeded { .. }));
        assert!(!dir.path().join("f").exists());
        assert!(!dir.path().join("f.part").exists());
    }

    #[tokio::test]
    async fn test_cancel_keeps_only_part() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::ok(b"hello"));
        let stop = CancellationToken::new();
        stop.cancel();
        let (transfer, _) = transfer(&client);
        let transfer = transfer.with_stop(stop);

        let dest = dir.path().join("f");
        std::fs::write(dir.path().join("f.part"), b"he").unwrap();
        let err = transfer.fetch(&TransferRequest::new("https://a.example/f", &dest), None).await.unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(!dest.exists());
        assert_eq!(std::fs::read(dir.path().join("f.part")).unwrap(), b"he");
        assert_eq!(client.call_count("https://a.example/f"), 0);
    }

    #[tokio::test]
    async fn test_initial_url_blocked_without_request() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        let (transfer, _) = transfer(&client);

        let err = transfer
            .fetch(&TransferRequest::new("http://127.0.0.1/secret", dir.path().join("f")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::BlockedUrl { .. }));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_uses_limiter_token() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://a.example/f", MockRoute::ok(b"hello"));
        let limiter = Arc::new(TokenBucket::with_clock(1, 1.0, Arc::new(ManualClock::new())));
        let (transfer, _) = transfer(&client);
        let transfer = transfer.with_limiter(Some(limiter.clone()));

        transfer
            .fetch(&TransferRequest::new("https://a.example/f", dir.path().join("f")), None)
            .await
            .unwrap();
        assert!(!limiter.try_acquire(1));
    }
}
