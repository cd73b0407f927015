use std::path::{Path, PathBuf};

use async_trait::async_trait;
use harvest_fetch::{ErrorKind, FetchError, TransferResult};
use serde::Deserialize;
use url::Url;

use super::{DownloadSpec, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};
use crate::tool::ToolCommand;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GitParams {
    #[serde(alias = "url")]
    pub repo_url: Option<String>,
    /// Branch, tag or commit; the remote HEAD when absent.
    #[serde(alias = "branch", alias = "commit")]
    pub revision: Option<String>,
    pub depth: Option<u32>,
    /// Checkout directory under the target's output directory.
    pub dir: Option<String>,
}

/// Clone or update a repository with the `git` tool and pin it to a revision.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHandler;

fn git(dir: &Path) -> ToolCommand {
    ToolCommand::new("git")
        .arg("-C")
        .arg(dir.to_string_lossy())
        .env("GIT_TERMINAL_PROMPT", "0")
}

impl GitHandler {
    async fn check_remote(ctx: &AcquireContext, repo_url: &str) -> Result<()> {
        let url = Url::parse(repo_url).map_err(|e| FetchError::InvalidUrl {
            url: repo_url.to_string(),
            reason: e.to_string(),
        })?;
        let blocked = |reason: String| AcquireError::Fetch(FetchError::blocked(repo_url, reason));
        match url.scheme() {
            "http" | "https" => Ok(ctx.validator().check(repo_url).await?),
            "ssh" | "git" => {
                let host = url.host().ok_or_else(|| blocked("URL has no host".into()))?;
                let port = url.port_or_known_default().unwrap_or(if url.scheme() == "ssh" { 22 } else { 9418 });
                let verdict = ctx.validator().validate_host(host, port).await;
                if verdict.allowed {
                    Ok(())
                } else {
                    Err(blocked(verdict.reason.unwrap_or_default()))
                }
            }
            other => Err(blocked(format!("git transport '{other}' is not allowed"))),
        }
    }

    async fn checkout(ctx: &AcquireContext, params: &GitParams, repo_url: &str, repo_dir: &Path) -> Result<String> {
        let stop = ctx.stop();
        let tools = ctx.tools();
        let depth: Vec<String> = params.depth.map(|d| format!("--depth={d}")).into_iter().collect();

        if repo_dir.join(".git").exists() {
            tracing::debug!(path = %repo_dir.display(), "updating existing clone");
        } else {
            if let Some(parent) = repo_dir.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let clone = ToolCommand::new("git")
                .args(["clone", "--no-checkout"])
                .args(depth.clone())
                .arg("--")
                .arg(repo_url)
                .arg(repo_dir.to_string_lossy())
                .env("GIT_TERMINAL_PROMPT", "0");
            tools.run_checked(&clone, stop).await?;
        }

        let revision = params.revision.as_deref().unwrap_or("HEAD");
        let fetch = git(repo_dir)
            .args(["fetch", "--tags"])
            .args(depth)
            .args(["origin", revision]);
        tools.run_checked(&fetch, stop).await?;
        let checkout = git(repo_dir).args(["checkout", "--force", "--detach", "FETCH_HEAD"]);
        tools.run_checked(&checkout, stop).await?;

        let head = tools.run_checked(&git(repo_dir).args(["rev-parse", "HEAD"]), stop).await?;
        let commit = head.stdout.trim().to_string();
        if commit.is_empty() {
            return Err(AcquireError::Tool {
                tool: "git".into(),
                message: "rev-parse printed no commit".into(),
            });
        }
        Ok(commit)
    }
}

#[async_trait]
impl StrategyHandler for GitHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::Git }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::Git(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let repo_url = params
            .repo_url
            .as_deref()
            .ok_or_else(|| AcquireError::missing("git strategy needs `repo_url`"))?;
        let dir_name = harvest_fs::safe_component(params.dir.as_deref().unwrap_or("repo"))?;
        let repo_dir: PathBuf = out_dir.join(&dir_name);

        if !ctx.config().flags.execute {
            return Ok(vec![TransferResult::planned(repo_url, Some(repo_dir))]);
        }
        Self::check_remote(ctx, repo_url).await?;

        let budget = ctx.target_budget(target);
        budget.start_file(&dir_name)?;
        let commit = Self::checkout(ctx, params, repo_url, &repo_dir).await?;

        let bytes = harvest_fs::dir_size(&repo_dir)?;
        if let Err(e) = budget.record_bytes(bytes, &dir_name) {
            harvest_fs::discard_dir(&repo_dir)?;
            return Ok(vec![
                TransferResult::error(ErrorKind::LimitExceeded, e.to_string())
                    .for_url(repo_url)
                    .with_commit(commit),
            ]);
        }
        tracing::info!(target_id = %target.id, commit = %commit, bytes, "repository checked out");

        Ok(vec![TransferResult::produced(repo_url, repo_dir, bytes, None).with_commit(commit)])
    }
}
