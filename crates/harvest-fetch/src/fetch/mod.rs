//! Retrying, resumable transfers onto staged `.part` files.

mod ftp;
mod resumable;

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use harvest_verify::{Hasher, Sha256Hasher};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::core::RetryPolicy;
use crate::data::TransferRequest;
use crate::error::{FetchError, Result};
use crate::rate::{Clock, TokenBucket};

pub use ftp::FtpTransfer;
pub use resumable::ResumableTransfer;

/// Limiter admission and cancellable backoff shared by every protocol.
#[derive(Clone)]
pub(crate) struct Pacing {
    pub(crate) retry: RetryPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) stop: CancellationToken,
    pub(crate) limiter: Option<Arc<TokenBucket>>,
}

impl Pacing {
    pub(crate) async fn admit(&self) -> Result<()> {
        if self.stop.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if let Some(limiter) = &self.limiter {
            let waited = limiter
                .acquire_cancellable(1, &self.stop)
                .await
                .ok_or(FetchError::Cancelled)?;
            if waited > 0.0 {
                tracing::debug!(waited_secs = waited, "rate limited");
            }
        }
        Ok(())
    }

    pub(crate) async fn backoff(&self, attempt: u32) -> Result<()> {
        let delay = self.retry.delay_for(attempt);
        tokio::select! {
            _ = self.stop.cancelled() => Err(FetchError::Cancelled),
            _ = self.clock.sleep(delay) => Ok(()),
        }
    }
}

/// Size of an existing part file, 0 when absent.
pub(crate) async fn part_len(part: &Path) -> u64 {
    tokio::fs::metadata(part).await.map(|m| m.len()).unwrap_or(0)
}

/// Streams bytes into a part file while hashing them.
pub(crate) struct PartWriter {
    file: File,
    hasher: Sha256Hasher,
    written: u64,
    limit: Option<u64>,
}

impl PartWriter {
    /// Truncate when `offset` is 0, otherwise hash the first `offset` bytes and append.
    pub(crate) async fn open(path: &Path, offset: u64, limit: Option<u64>) -> Result<Self> {
        let mut hasher = Sha256Hasher::new();
        let file = if offset == 0 {
            File::create(path).await?
        } else {
            let mut existing = File::open(path).await?.take(offset);
            let mut buf = vec![0u8; 64 * 1024];
            let mut hashed = 0u64;
            loop {
                let n = existing.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                hashed += n as u64;
            }
            if hashed != offset {
                return Err(FetchError::ProtocolViolation(format!(
                    "part file shrank to {hashed} bytes, expected {offset}"
                )));
            }
            let mut file = OpenOptions::new().write(true).open(path).await?;
            file.set_len(offset).await?;
            file.seek(SeekFrom::Start(offset)).await?;
            file
        };
        Ok(Self {
            file,
            hasher,
            written: offset,
            limit,
        })
    }

    pub(crate) fn written(&self) -> u64 { self.written }

    pub(crate) async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let next = self.written + chunk.len() as u64;
        if let Some(limit) = self.limit {
            if next > limit {
                return Err(FetchError::LimitExceeded {
                    limit,
                    attempted: next,
                });
            }
        }
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.written = next;
        Ok(())
    }

    /// Let buffered writes land so the part length is accurate for a resume.
    pub(crate) async fn settle(&mut self) {
        if let Err(e) = self.file.flush().await {
            tracing::debug!(error = %e, "flushing partial file failed");
        }
    }

    /// Flush to disk; returns total bytes and the hex SHA-256.
    pub(crate) async fn finish(mut self) -> Result<(u64, String)> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok((self.written, self.hasher.finalize_hex()))
    }
}

/// Size then checksum, then rename `part` onto `dest`.
pub(crate) fn verify_and_publish(
    part: &Path,
    request: &TransferRequest,
    written: u64,
    sha256: &str,
    verify_checksums: bool,
) -> Result<PathBuf> {
    if let Some(expected) = request.expected_size {
        if expected != written {
            return Err(FetchError::SizeMismatch {
                expected,
                actual: written,
            });
        }
    }
    if verify_checksums {
        if let Some(expected) = &request.expected_sha256 {
            let actual = hex::decode(sha256).unwrap_or_default();
            if expected.verify(&actual).is_err() {
                return Err(FetchError::ChecksumMismatch {
                    expected: expected.to_hex(),
                    actual: sha256.to_string(),
                });
            }
        }
    }
    harvest_fs::publish(part, &request.dest)?;
    Ok(request.dest.clone())
}

/// Remove a part file that can no longer be resumed.
pub(crate) fn drop_part(part: &Path) {
    if let Err(e) = harvest_fs::discard(part) {
        tracing::warn!(path = %part.display(), error = %e, "failed to remove partial file");
    }
}
