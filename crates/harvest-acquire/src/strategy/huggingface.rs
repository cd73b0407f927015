use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::TransferResult;
use serde::Deserialize;

use super::files::{Downloader, FileJob, GlobSet, endpoint_url, local_path, parse_sha256};
use super::{DownloadSpec, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::{AcquireContext, bearer};
use crate::error::{AcquireError, Result};

const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
const DEFAULT_REVISION: &str = "main";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HuggingFaceParams {
    pub repo_id: Option<String>,
    pub revision: Option<String>,
    pub allow_patterns: Vec<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatasetInfo {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    lfs: Option<Lfs>,
}

#[derive(Debug, Deserialize)]
struct Lfs {
    sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HuggingFaceHandler;

#[async_trait]
impl StrategyHandler for HuggingFaceHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::HuggingfaceDatasets }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::HuggingfaceDatasets(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let repo_id = params
            .repo_id
            .as_deref()
            .ok_or_else(|| AcquireError::missing("huggingface_datasets strategy needs `repo_id`"))?;
        let repo: Vec<&str> = repo_id.split('/').filter(|s| !s.is_empty()).collect();
        if repo.is_empty() || repo.len() > 2 {
            return Err(AcquireError::Config(format!("repo_id '{repo_id}' is not of the form owner/name")));
        }
        let revision = params.revision.as_deref().unwrap_or(DEFAULT_REVISION);
        let endpoint = params.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);

        let mut info_url = endpoint_url(
            endpoint,
            ["api", "datasets"].into_iter().chain(repo.iter().copied()).chain(["revision", revision]),
        )?;
        info_url.set_query(Some("blobs=true"));
        let patterns = GlobSet::new(&params.allow_patterns)?;
        if !ctx.config().flags.execute {
            return Ok(vec![TransferResult::planned(info_url, Some(out_dir.to_path_buf()))]);
        }

        let headers = bearer(ctx.token("huggingface"));
        let info: DatasetInfo = ctx.get_json(info_url.as_str(), &headers, self.kind().resolver()).await?;
        // Pin downloads to the resolved commit so a moving branch cannot mix revisions.
        let pinned = info.sha.as_deref().unwrap_or(revision);
        tracing::debug!(target_id = %target.id, revision, commit = pinned, files = info.siblings.len(), "dataset resolved");

        let mut jobs = Vec::new();
        for sibling in info.siblings.iter().filter(|s| patterns.matches(&s.rfilename)) {
            let url = endpoint_url(
                endpoint,
                ["datasets"]
                    .into_iter()
                    .chain(repo.iter().copied())
                    .chain(["resolve", pinned])
                    .chain(sibling.rfilename.split('/')),
            )?;
            let sha256 = sibling.lfs.as_ref().and_then(|lfs| lfs.sha256.as_deref());
            jobs.push(
                FileJob::new(url, local_path(out_dir, &sibling.rfilename)?)
                    .size(sibling.size)
                    .sha256(parse_sha256(sha256)?)
                    .headers(headers.clone())
                    .commit(info.sha.clone()),
            );
        }
        if jobs.is_empty() {
            return Ok(vec![TransferResult::noop(format!("no files of {repo_id} match the patterns"))]);
        }
        let downloader = Downloader::new(ctx, ctx.target_budget(target), self.kind().resolver());
        Ok(downloader.fetch_all(jobs).await)
    }
}
