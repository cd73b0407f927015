use std::path::PathBuf;

use harvest_fetch::budget::BudgetError;
use harvest_fetch::{ErrorKind, FetchError};
use thiserror::Error;

use crate::strategy::StrategyKind;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("target queue line {line}: {source}")]
    Queue {
        line: usize,
        source: serde_json::Error,
    },

    #[error("no handler registered for strategy '{0}'")]
    MissingHandler(StrategyKind),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("failed to decode JSON from {url}: {source}")]
    Json {
        url: String,
        source: serde_json::Error,
    },

    #[error("run stopped")]
    Cancelled,

    #[error(transparent)]
    Fs(#[from] harvest_fs::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AcquireError>;

impl AcquireError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquireError::MissingConfiguration(_)
            | AcquireError::Config(_)
            | AcquireError::Parse { .. }
            | AcquireError::Queue { .. }
            | AcquireError::MissingHandler(_) => ErrorKind::MissingConfiguration,
            AcquireError::Fetch(err) => err.kind(),
            AcquireError::Budget(_) => ErrorKind::LimitExceeded,
            AcquireError::Tool { .. } => ErrorKind::ToolFailed,
            AcquireError::InvalidResponse { .. } | AcquireError::Json { .. } => ErrorKind::InvalidResponse,
            AcquireError::Cancelled => ErrorKind::Cancelled,
            AcquireError::Fs(_) | AcquireError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn missing(what: impl Into<String>) -> Self { AcquireError::MissingConfiguration(what.into()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(AcquireError::missing("url").kind(), ErrorKind::MissingConfiguration);
        assert_eq!(AcquireError::Fetch(FetchError::Timeout).kind(), ErrorKind::TransientNetwork);
        assert_eq!(
            AcquireError::Budget(BudgetError::RunExhausted { label: "t/f".into() }).kind(),
            ErrorKind::LimitExceeded
        );
        assert_eq!(
            AcquireError::Tool {
                tool: "git".into(),
                message: "exit status 128".into()
            }
            .kind(),
            ErrorKind::ToolFailed
        );
    }
}
