//! Strategy dispatch: the closed set of strategy kinds, their typed
//! parameters, and the handler table built once per run.

mod dataverse;
mod figshare;
mod files;
mod ftp;
mod git;
mod github_release;
mod http;
mod huggingface;
mod none;
mod s3;
mod torrent;
mod zenodo;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use harvest_fetch::TransferResult;
use serde::{Deserialize, Serialize};

use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};

pub use dataverse::{DataverseHandler, DataverseParams};
pub use figshare::{FigshareHandler, FigshareParams};
pub use files::GlobSet;
pub use ftp::{FtpHandler, FtpParams};
pub use git::{GitHandler, GitParams};
pub use github_release::{GithubReleaseHandler, GithubReleaseParams};
pub use http::{HttpHandler, HttpParams};
pub use huggingface::{HuggingFaceHandler, HuggingFaceParams};
pub use none::NoneHandler;
pub use s3::{S3Handler, S3Params};
pub use torrent::{TorrentHandler, TorrentParams};
pub use zenodo::{ZenodoHandler, ZenodoParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    None,
    Http,
    Ftp,
    Git,
    Zenodo,
    Figshare,
    GithubRelease,
    Dataverse,
    HuggingfaceDatasets,
    S3,
    Torrent,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 11] = [
        StrategyKind::None,
        StrategyKind::Http,
        StrategyKind::Ftp,
        StrategyKind::Git,
        StrategyKind::Zenodo,
        StrategyKind::Figshare,
        StrategyKind::GithubRelease,
        StrategyKind::Dataverse,
        StrategyKind::HuggingfaceDatasets,
        StrategyKind::S3,
        StrategyKind::Torrent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::None => "none",
            StrategyKind::Http => "http",
            StrategyKind::Ftp => "ftp",
            StrategyKind::Git => "git",
            StrategyKind::Zenodo => "zenodo",
            StrategyKind::Figshare => "figshare",
            StrategyKind::GithubRelease => "github_release",
            StrategyKind::Dataverse => "dataverse",
            StrategyKind::HuggingfaceDatasets => "huggingface_datasets",
            StrategyKind::S3 => "s3",
            StrategyKind::Torrent => "torrent",
        }
    }

    /// Name of the rate limiter shared by every target of this kind.
    pub fn resolver(&self) -> &'static str {
        match self {
            StrategyKind::GithubRelease => "github",
            StrategyKind::HuggingfaceDatasets => "huggingface",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A target's `download` table, tagged by `strategy`.
///
/// Parameter fields are all optional at parse time; a handler reports a
/// missing required field as a `missing_configuration` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DownloadSpec {
    None,
    Http(HttpParams),
    Ftp(FtpParams),
    Git(GitParams),
    Zenodo(ZenodoParams),
    Figshare(FigshareParams),
    GithubRelease(GithubReleaseParams),
    Dataverse(DataverseParams),
    HuggingfaceDatasets(HuggingFaceParams),
    S3(S3Params),
    Torrent(TorrentParams),
}

impl DownloadSpec {
    pub fn kind(&self) -> StrategyKind {
        match self {
            DownloadSpec::None => StrategyKind::None,
            DownloadSpec::Http(_) => StrategyKind::Http,
            DownloadSpec::Ftp(_) => StrategyKind::Ftp,
            DownloadSpec::Git(_) => StrategyKind::Git,
            DownloadSpec::Zenodo(_) => StrategyKind::Zenodo,
            DownloadSpec::Figshare(_) => StrategyKind::Figshare,
            DownloadSpec::GithubRelease(_) => StrategyKind::GithubRelease,
            DownloadSpec::Dataverse(_) => StrategyKind::Dataverse,
            DownloadSpec::HuggingfaceDatasets(_) => StrategyKind::HuggingfaceDatasets,
            DownloadSpec::S3(_) => StrategyKind::S3,
            DownloadSpec::Torrent(_) => StrategyKind::Torrent,
        }
    }
}

/// A record or article id written either as a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawIdentifier")]
pub struct Identifier(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Text(String),
    Number(u64),
}

impl From<RawIdentifier> for Identifier {
    fn from(raw: RawIdentifier) -> Self {
        match raw {
            RawIdentifier::Text(text) => Identifier(text.trim().to_string()),
            RawIdentifier::Number(number) => Identifier(number.to_string()),
        }
    }
}

impl Identifier {
    pub fn new(id: impl Into<String>) -> Self { Identifier(id.into()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Turns one target into transfer results.
#[async_trait]
pub trait StrategyHandler: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// In plan mode (`execute = false`) this must not touch the network or
    /// the payload tree.
    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>>;
}

pub(crate) fn mismatch(kind: StrategyKind, target: &Target) -> AcquireError {
    AcquireError::Config(format!(
        "target '{}' declares strategy '{}' but was routed to the {kind} handler",
        target.id,
        target.download.kind()
    ))
}

/// Kind to handler table.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    handlers: HashMap<StrategyKind, Arc<dyn StrategyHandler>>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("StrategyRegistry").field("kinds", &kinds).finish()
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self { Self::default() }

    /// Every built-in handler.
    pub fn builtin() -> Self {
        Self::empty()
            .register(NoneHandler)
            .register(HttpHandler)
            .register(FtpHandler)
            .register(GitHandler)
            .register(ZenodoHandler)
            .register(FigshareHandler)
            .register(GithubReleaseHandler)
            .register(DataverseHandler)
            .register(HuggingFaceHandler)
            .register(S3Handler)
            .register(TorrentHandler)
    }

    /// Add or replace the handler for its kind.
    pub fn register(mut self, handler: impl StrategyHandler + 'static) -> Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn StrategyHandler>> { self.handlers.get(&kind).cloned() }

    /// Fail startup when an enabled target has no handler.
    pub fn validate_targets(&self, targets: &[Target]) -> Result<()> {
        for target in targets.iter().filter(|t| t.enabled) {
            let kind = target.download.kind();
            if !self.handlers.contains_key(&kind) {
                return Err(AcquireError::MissingHandler(kind));
            }
        }
        Ok(())
    }
}
