use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::TransferResult;
use serde::Deserialize;

use super::files::{Downloader, FileJob, GlobSet, endpoint_url, local_path, parse_sha256};
use super::{DownloadSpec, Identifier, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::{AcquireContext, bearer};
use crate::error::{AcquireError, Result};

const DEFAULT_API: &str = "https://api.github.com";

/// Release assets of `owner/name`. `tag` wins over `release_id`; the latest
/// release is used when neither is set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GithubReleaseParams {
    pub repo: Option<String>,
    pub tag: Option<String>,
    pub release_id: Option<Identifier>,
    pub asset_patterns: Vec<String>,
    pub api_base: Option<String>,
}

impl GithubReleaseParams {
    fn release_url(&self) -> Result<String> {
        let repo = self
            .repo
            .as_deref()
            .ok_or_else(|| AcquireError::missing("github_release strategy needs `repo`"))?;
        let valid = repo.split('/').count() == 2 && repo.split('/').all(|part| !part.is_empty() && part != "..");
        if !valid {
            return Err(AcquireError::Config(format!("repo '{repo}' is not of the form owner/name")));
        }
        let (owner, name) = repo.split_once('/').unwrap_or((repo, ""));
        let release = match (&self.tag, &self.release_id) {
            (Some(tag), _) => vec!["tags".to_string(), tag.clone()],
            (None, Some(id)) => vec![id.to_string()],
            (None, None) => vec!["latest".to_string()],
        };
        let segments = ["repos", owner, name, "releases"]
            .into_iter()
            .chain(release.iter().map(String::as_str));
        Ok(endpoint_url(self.api_base.as_deref().unwrap_or(DEFAULT_API), segments)?.into())
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    browser_download_url: String,
    /// `sha256:<hex>` on newer releases.
    #[serde(default)]
    digest: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GithubReleaseHandler;

#[async_trait]
impl StrategyHandler for GithubReleaseHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::GithubRelease }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::GithubRelease(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let release_url = params.release_url()?;
        let patterns = GlobSet::new(&params.asset_patterns)?;
        if !ctx.config().flags.execute {
            return Ok(vec![TransferResult::planned(release_url, Some(out_dir.to_path_buf()))]);
        }

        let mut headers = bearer(ctx.token("github"));
        headers.push(("Accept".into(), "application/vnd.github+json".into()));
        let release: Release = ctx.get_json(&release_url, &headers, self.kind().resolver()).await?;
        tracing::debug!(
            target_id = %target.id,
            tag = release.tag_name.as_deref().unwrap_or("?"),
            assets = release.assets.len(),
            "release resolved"
        );

        // Asset downloads redirect to a CDN; the token stays on the API host.
        let download_headers = vec![("Accept".to_string(), "application/octet-stream".to_string())];
        let mut jobs = Vec::new();
        for asset in release.assets.iter().filter(|a| patterns.matches(&a.name)) {
            let sha256 = parse_sha256(asset.digest.as_deref().and_then(|d| d.strip_prefix("sha256:")))?;
            let job = FileJob::new(&asset.browser_download_url, local_path(out_dir, &asset.name)?)
                .size(asset.size)
                .sha256(sha256)
                .headers(download_headers.clone());
            jobs.push(match &release.tag_name {
                Some(tag) => job.commit(Some(tag.clone())),
                None => job,
            });
        }
        if jobs.is_empty() {
            return Ok(vec![TransferResult::noop(format!("no assets of {release_url} match the patterns"))]);
        }
        let downloader = Downloader::new(ctx, ctx.target_budget(target), self.kind().resolver());
        Ok(downloader.fetch_all(jobs).await)
    }
}
