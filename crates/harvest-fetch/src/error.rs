//! Error types for harvest-fetch.

use std::io;

use thiserror::Error;

use crate::budget::BudgetError;
use crate::data::ErrorKind;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request could not be built, e.g. a configured header is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("blocked URL '{url}': {reason}")]
    BlockedUrl { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timeout")]
    Timeout,

    #[error("response body interrupted: {0}")]
    Body(String),

    #[error("redirect loop detected (more than {0} redirects)")]
    TooManyRedirects(usize),

    #[error("redirect from {0} has no usable Location header")]
    MissingLocation(String),

    #[error("resume protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("transfer exceeds byte limit: {attempted} > {limit}")]
    LimitExceeded { limit: u64, attempted: u64 },

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error("FTP reply {code}: {message}")]
    Ftp { code: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Fs(#[from] harvest_fs::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidUrl { .. } | FetchError::BlockedUrl { .. } => ErrorKind::BlockedUrl,
            FetchError::InvalidRequest(_) => ErrorKind::MissingConfiguration,
            FetchError::HttpStatus { .. } => ErrorKind::HttpStatus,
            FetchError::Connect(_) | FetchError::Timeout | FetchError::Body(_) => {
                ErrorKind::TransientNetwork
            }
            FetchError::TooManyRedirects(_)
            | FetchError::MissingLocation(_)
            | FetchError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            FetchError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            FetchError::ChecksumMismatch { .. } => ErrorKind::Sha256Mismatch,
            FetchError::LimitExceeded { .. } | FetchError::Budget(_) => ErrorKind::LimitExceeded,
            FetchError::Ftp { code, .. } if (400..500).contains(code) => ErrorKind::TransientNetwork,
            FetchError::Ftp { .. } => ErrorKind::HttpStatus,
            FetchError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            FetchError::Cancelled => ErrorKind::Cancelled,
            FetchError::Io(_) | FetchError::Fs(_) => ErrorKind::Io,
        }
    }

    /// The partial file stays usable for a later resume.
    pub fn keeps_partial(&self) -> bool {
        matches!(
            self,
            FetchError::Connect(_)
                | FetchError::Timeout
                | FetchError::Body(_)
                | FetchError::HttpStatus { .. }
                | FetchError::Ftp { .. }
                | FetchError::Cancelled
        )
    }

    pub fn blocked(url: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::BlockedUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
