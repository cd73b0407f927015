use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to publish '{from}' to '{to}': {source}")]
    Publish {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("path has no file name: '{0}'")]
    NoFileName(PathBuf),

    #[error("invalid path component: '{0}'")]
    InvalidComponent(String),
}

pub type Result<T> = std::result::Result<T, Error>;
