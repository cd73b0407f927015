use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Pacing, PartWriter, drop_part, part_len, verify_and_publish};
use crate::core::RetryPolicy;
use crate::data::{TransferOptions, TransferOutcome, TransferRequest};
use crate::error::{FetchError, Result};
use crate::net::ftp::{DEFAULT_FTP_PORT, FtpSession, with_timeout};
use crate::net::UrlSafetyValidator;
use crate::rate::{Clock, SystemClock, TokenBucket};

/// Passive-mode binary FTP download with `REST` resume, sharing the
/// part-file, validation and retry behaviour of HTTP transfers.
pub struct FtpTransfer {
    validator: Arc<UrlSafetyValidator>,
    options: TransferOptions,
    pacing: Pacing,
    credentials: Option<(String, String)>,
}

impl FtpTransfer {
    pub fn new(validator: Arc<UrlSafetyValidator>) -> Self {
        Self {
            validator,
            options: TransferOptions::default(),
            pacing: Pacing {
                retry: RetryPolicy::default(),
                clock: Arc::new(SystemClock::new()),
                stop: CancellationToken::new(),
                limiter: None,
            },
            credentials: None,
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

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.pacing.clock = clock;
        self
    }

    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.pacing.stop = stop;
        self
    }

    /// Login used when the URL carries none. Defaults to anonymous.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    pub async fn fetch(&self, request: &TransferRequest, max_bytes: Option<u64>) -> Result<TransferOutcome> {
        let url = Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "ftp" {
            return Err(FetchError::blocked(&request.url, "not an ftp:// URL"));
        }
        let host = url
            .host()
            .ok_or_else(|| FetchError::blocked(&request.url, "URL has no host"))?;
        let port = url.port().unwrap_or(DEFAULT_FTP_PORT);
        let verdict = self.validator.validate_host(host, port).await;
        if !verdict.allowed {
            return Err(FetchError::blocked(&request.url, verdict.reason.unwrap_or_default()));
        }

        let part = harvest_fs::part_path(&request.dest)?;
        if let Some(parent) = request.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut fresh = !self.options.resume;
        let mut attempt = 1u32;
        loop {
            self.pacing.admit().await?;
            let err = match self.attempt(&url, request, &part, fresh, max_bytes).await {
                Ok(outcome) => {
                    tracing::info!(url = %request.url, bytes = outcome.bytes, "ftp transfer complete");
                    return Ok(outcome);
                }
                Err(err) => err,
            };
            if matches!(err, FetchError::ProtocolViolation(_)) {
                drop_part(&part);
                fresh = true;
            }
            if self.pacing.retry.is_retryable(&err, attempt) {
                tracing::warn!(url = %request.url, attempt, error = %err, "ftp attempt failed, retrying");
                self.pacing.backoff(attempt).await?;
                attempt += 1;
                continue;
            }
            if !err.keeps_partial() {
                drop_part(&part);
            }
            return Err(err);
        }
    }

    fn login(&self, url: &Url) -> (String, String) {
        if !url.username().is_empty() {
            return (
                url.username().to_string(),
                url.password().unwrap_or_default().to_string(),
            );
        }
        self.credentials
            .clone()
            .unwrap_or_else(|| ("anonymous".to_string(), "anonymous@".to_string()))
    }

    async fn attempt(
        &self,
        url: &Url,
        request: &TransferRequest,
        part: &Path,
        fresh: bool,
        max_bytes: Option<u64>,
    ) -> Result<TransferOutcome> {
        let host = url.host_str().unwrap_or_default();
        let port = url.port().unwrap_or(DEFAULT_FTP_PORT);
        let timeout = self.options.io_timeout;

        let mut session = FtpSession::connect(host, port, timeout).await?;
        let (user, password) = self.login(url);
        session.login(&user, &password).await?;
        session.binary().await?;

        let path = url.path();
        let remote_size = session.size(path).await?;
        let offset = if fresh { 0 } else { part_len(part).await };
        if remote_size.is_some_and(|size| offset > size) {
            return Err(FetchError::ProtocolViolation(format!(
                "partial file ({offset} bytes) is larger than the remote file"
            )));
        }
        // a finished part only needs validating
        let complete = offset > 0 && remote_size == Some(offset);
        if let (Some(limit), Some(size)) = (max_bytes, remote_size) {
            if size > limit {
                return Err(FetchError::LimitExceeded {
                    limit,
                    attempted: size,
                });
            }
        }

        let mut writer = PartWriter::open(part, offset, max_bytes).await?;
        if !complete {
            let mut data = session.retrieve(path, offset).await?;
            if let Err(err) = self.stream_data(&mut data, &mut writer, timeout).await {
                writer.settle().await;
                return Err(err);
            }
            drop(data);
            session.finish_transfer().await?;
        }
        session.quit().await;

        if let Some(size) = remote_size {
            if writer.written() < size {
                writer.settle().await;
                return Err(FetchError::Body(format!(
                    "data connection closed after {} of {size} bytes",
                    writer.written()
                )));
            }
        }
        let (written, sha256) = writer.finish().await?;
        let path = verify_and_publish(part, request, written, &sha256, self.options.verify_checksums)?;

        Ok(TransferOutcome {
            path,
            resolved_url: request.url.clone(),
            redirect_chain: vec![request.url.clone()],
            bytes: written,
            sha256,
            resumed_from: offset,
        })
    }

    async fn stream_data(
        &self,
        data: &mut TcpStream,
        writer: &mut PartWriter,
        timeout: std::time::Duration,
    ) -> Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = tokio::select! {
                _ = self.pacing.stop.cancelled() => return Err(FetchError::Cancelled),
                read = with_timeout(timeout, async {
                    data.read(&mut buf).await.map_err(|e| FetchError::Body(e.to_string()))
                }) => read?,
            };
            if read == 0 {
                return Ok(());
            }
            writer.write(&buf[..read]).await?;
        }
    }
}
