use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use harvest_verify::Sha256Digest;

pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Run-wide knobs that shape every transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Send `Range` for an existing `.part` file instead of starting over.
    pub resume: bool,
    /// Compare against declared SHA-256 digests. The digest is always computed.
    pub verify_checksums: bool,
    pub max_redirects: usize,
    /// Control/data socket timeout for protocols without a client-level one (FTP).
    pub io_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            resume: true,
            verify_checksums: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            io_timeout: Duration::from_secs(60),
        }
    }
}

impl TransferOptions {
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

/// One object to fetch into `dest`.
#[derive(Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: String,
    pub dest: PathBuf,
    pub expected_size: Option<u64>,
    pub expected_sha256: Option<Sha256Digest>,
    pub headers: Vec<(String, String)>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            expected_size: None,
            expected_sha256: None,
            headers: Vec::new(),
        }
    }

    pub fn expected_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }

    pub fn expected_sha256(mut self, digest: Option<Sha256Digest>) -> Self {
        self.expected_sha256 = digest;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // header values may carry tokens
        let header_names: Vec<_> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("TransferRequest")
            .field("url", &self.url)
            .field("dest", &self.dest)
            .field("expected_size", &self.expected_size)
            .field("expected_sha256", &self.expected_sha256)
            .field("headers", &header_names)
            .finish()
    }
}
