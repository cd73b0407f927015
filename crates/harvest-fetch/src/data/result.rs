use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Outcome class of one acquired object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Ok,
    Noop,
    Planned,
    SkippedExists,
    Cached,
    Error,
    /// Reserved for a handler that produced no results at all.
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Ok => "ok",
            TransferStatus::Noop => "noop",
            TransferStatus::Planned => "planned",
            TransferStatus::SkippedExists => "skipped_exists",
            TransferStatus::Cached => "cached",
            TransferStatus::Error => "error",
            TransferStatus::Failed => "failed",
        }
    }

    pub fn is_failure(&self) -> bool { matches!(self, TransferStatus::Error | TransferStatus::Failed) }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Failure taxonomy recorded in manifests and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingConfiguration,
    BlockedUrl,
    SizeMismatch,
    Sha256Mismatch,
    TransientNetwork,
    HttpStatus,
    ProtocolViolation,
    LimitExceeded,
    HandlerReturnedNoResults,
    HandlerPanicked,
    ToolFailed,
    InvalidResponse,
    Io,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingConfiguration => "missing_configuration",
            ErrorKind::BlockedUrl => "blocked_url",
            ErrorKind::SizeMismatch => "size_mismatch",
            ErrorKind::Sha256Mismatch => "sha256_mismatch",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::HandlerReturnedNoResults => "handler_returned_no_results",
            ErrorKind::HandlerPanicked => "handler_panicked",
            ErrorKind::ToolFailed => "tool_failed",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Io => "io",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A successfully published transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub path: PathBuf,
    /// Last URL in the redirect chain.
    pub resolved_url: String,
    pub redirect_chain: Vec<String>,
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the published file.
    pub sha256: String,
    /// Offset the final attempt resumed from (0 for a full download).
    pub resumed_from: u64,
}

/// One entry of a target manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub status: TransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferResult {
    fn with_status(status: TransferStatus) -> Self {
        Self {
            status,
            url: None,
            path: None,
            resolved_url: None,
            content_length: None,
            sha256: None,
            commit: None,
            error_kind: None,
            error: None,
        }
    }

    pub fn ok(url: impl Into<String>, outcome: &TransferOutcome) -> Self {
        Self {
            url: Some(url.into()),
            path: Some(outcome.path.clone()),
            resolved_url: Some(outcome.resolved_url.clone()),
            content_length: Some(outcome.bytes),
            sha256: Some(outcome.sha256.clone()),
            ..Self::with_status(TransferStatus::Ok)
        }
    }

    /// An artifact written by an external tool rather than a transfer.
    pub fn produced(url: impl Into<String>, path: PathBuf, bytes: u64, sha256: Option<String>) -> Self {
        Self {
            url: Some(url.into()),
            path: Some(path),
            content_length: Some(bytes),
            sha256,
            ..Self::with_status(TransferStatus::Ok)
        }
    }

    pub fn planned(url: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            url: Some(url.into()),
            path,
            ..Self::with_status(TransferStatus::Planned)
        }
    }

    pub fn noop(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::with_status(TransferStatus::Noop)
        }
    }

    pub fn cached(url: Option<String>, path: PathBuf, bytes: u64, sha256: Option<String>) -> Self {
        Self {
            url,
            path: Some(path),
            content_length: Some(bytes),
            sha256,
            ..Self::with_status(TransferStatus::Cached)
        }
    }

    pub fn skipped_exists(url: Option<String>, path: PathBuf) -> Self {
        Self {
            url,
            path: Some(path),
            ..Self::with_status(TransferStatus::SkippedExists)
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_kind: Some(kind),
            error: Some(message.into()),
            ..Self::with_status(TransferStatus::Error)
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_kind: Some(kind),
            error: Some(message.into()),
            ..Self::with_status(TransferStatus::Failed)
        }
    }

    pub fn for_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn at_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }
}
