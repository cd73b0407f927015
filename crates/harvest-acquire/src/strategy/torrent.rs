use std::path::{Path, PathBuf};

use async_trait::async_trait;
use harvest_fetch::TransferResult;
use serde::Deserialize;

use super::files::record_tree;
use super::{DownloadSpec, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};
use crate::tool::ToolCommand;

/// A magnet link, or a `.torrent` given as a URL or a local path.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TorrentParams {
    pub magnet: Option<String>,
    pub torrent: Option<String>,
}

enum Source {
    Magnet(String),
    Url(String),
    File(PathBuf),
}

impl Source {
    fn from_params(params: &TorrentParams) -> Result<Self> {
        if let Some(magnet) = &params.magnet {
            if !magnet.starts_with("magnet:?") {
                return Err(AcquireError::Config(format!("'{magnet}' is not a magnet link")));
            }
            return Ok(Source::Magnet(magnet.clone()));
        }
        let torrent = params
            .torrent
            .as_deref()
            .ok_or_else(|| AcquireError::missing("torrent strategy needs `magnet` or `torrent`"))?;
        if torrent.starts_with("http://") || torrent.starts_with("https://") {
            Ok(Source::Url(torrent.to_string()))
        } else {
            Ok(Source::File(PathBuf::from(torrent)))
        }
    }

    fn as_arg(&self) -> String {
        match self {
            Source::Magnet(s) | Source::Url(s) => s.clone(),
            Source::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TorrentHandler;

#[async_trait]
impl StrategyHandler for TorrentHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::Torrent }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::Torrent(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let source = Source::from_params(params)?;
        let label = source.as_arg();
        if !ctx.config().flags.execute {
            return Ok(vec![TransferResult::planned(label, Some(out_dir.to_path_buf()))]);
        }

        match &source {
            Source::Url(url) => ctx.validator().check(url).await?,
            Source::File(path) if !path.is_file() => {
                return Err(AcquireError::Config(format!("torrent file '{}' does not exist", path.display())));
            }
            _ => {}
        }
        if !ctx.config().flags.overwrite && !harvest_fs::list_files(out_dir, &[])?.is_empty() {
            return Ok(vec![TransferResult::skipped_exists(Some(label), out_dir.to_path_buf())]);
        }

        tokio::fs::create_dir_all(out_dir).await?;
        let command = ToolCommand::new("aria2c")
            .args(["--seed-time=0", "--summary-interval=0", "--console-log-level=warn"])
            .arg(format!("--dir={}", out_dir.display()))
            .arg(label.clone());
        ctx.tools().run_checked(&command, ctx.stop()).await?;
        record_tree(&ctx.target_budget(target), out_dir, &label, &[]).await
    }
}
