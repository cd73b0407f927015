use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::TransferResult;
use serde::Deserialize;

use super::files::{Downloader, FileJob, GlobSet, local_path};
use super::{DownloadSpec, Identifier, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};

const DEFAULT_API: &str = "https://zenodo.org/api";
const DOI_PREFIX: &str = "10.5281/zenodo.";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ZenodoParams {
    pub record_id: Option<Identifier>,
    /// `10.5281/zenodo.<id>`, used when `record_id` is absent.
    pub doi: Option<String>,
    pub api_base: Option<String>,
    /// Name filters; all files when empty.
    pub files: Vec<String>,
}

impl ZenodoParams {
    fn record_id(&self) -> Result<String> {
        if let Some(id) = &self.record_id {
            return Ok(id.to_string());
        }
        let doi = self
            .doi
            .as_deref()
            .ok_or_else(|| AcquireError::missing("zenodo strategy needs `record_id` or `doi`"))?;
        let doi = doi.trim().trim_start_matches("https://doi.org/");
        match doi.strip_prefix(DOI_PREFIX) {
            Some(id) if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => Ok(id.to_string()),
            _ => Err(AcquireError::Config(format!("'{doi}' is not a Zenodo DOI"))),
        }
    }

    fn record_url(&self) -> Result<String> {
        let base = self.api_base.as_deref().unwrap_or(DEFAULT_API).trim_end_matches('/');
        Ok(format!("{base}/records/{}", self.record_id()?))
    }
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(default)]
    files: Vec<RecordFile>,
}

#[derive(Debug, Deserialize)]
struct RecordFile {
    #[serde(alias = "filename")]
    key: String,
    #[serde(default, alias = "filesize")]
    size: Option<u64>,
    #[serde(default)]
    links: RecordLinks,
}

#[derive(Debug, Default, Deserialize)]
struct RecordLinks {
    #[serde(rename = "self")]
    self_: Option<String>,
    content: Option<String>,
    download: Option<String>,
}

impl RecordFile {
    fn url(&self) -> Option<&str> {
        self.links
            .self_
            .as_deref()
            .or(self.links.content.as_deref())
            .or(self.links.download.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZenodoHandler;

#[async_trait]
impl StrategyHandler for ZenodoHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::Zenodo }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::Zenodo(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let record_url = params.record_url()?;
        let filter = GlobSet::new(&params.files)?;
        if !ctx.config().flags.execute {
            return Ok(vec![TransferResult::planned(record_url, Some(out_dir.to_path_buf()))]);
        }

        let record: Record = ctx.get_json(&record_url, &[], self.kind().resolver()).await?;
        let mut jobs = Vec::new();
        for file in record.files.iter().filter(|f| filter.matches(&f.key)) {
            let url = file.url().ok_or_else(|| AcquireError::InvalidResponse {
                url: record_url.clone(),
                message: format!("file '{}' has no download link", file.key),
            })?;
            jobs.push(FileJob::new(url, local_path(out_dir, &file.key)?).size(file.size));
        }
        tracing::debug!(target_id = %target.id, files = jobs.len(), "zenodo record resolved");
        if jobs.is_empty() {
            return Ok(vec![TransferResult::noop(format!("no files in {record_url} match the filter"))]);
        }
        let downloader = Downloader::new(ctx, ctx.target_budget(target), self.kind().resolver());
        Ok(downloader.fetch_all(jobs).await)
    }
}
