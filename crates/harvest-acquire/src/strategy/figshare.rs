use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::TransferResult;
use serde::Deserialize;

use super::files::{Downloader, FileJob, GlobSet, local_path};
use super::{DownloadSpec, Identifier, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};

const DEFAULT_API: &str = "https://api.figshare.com/v2";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FigshareParams {
    pub article_id: Option<Identifier>,
    pub api_base: Option<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ArticleFile {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    download_url: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FigshareHandler;

#[async_trait]
impl StrategyHandler for FigshareHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::Figshare }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::Figshare(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let article = params
            .article_id
            .as_ref()
            .ok_or_else(|| AcquireError::missing("figshare strategy needs `article_id`"))?;
        let base = params.api_base.as_deref().unwrap_or(DEFAULT_API).trim_end_matches('/');
        let listing_url = format!("{base}/articles/{article}/files");
        let filter = GlobSet::new(&params.files)?;
        if !ctx.config().flags.execute {
            return Ok(vec![TransferResult::planned(listing_url, Some(out_dir.to_path_buf()))]);
        }

        let files: Vec<ArticleFile> = ctx.get_json(&listing_url, &[], self.kind().resolver()).await?;
        let jobs = files
            .iter()
            .filter(|file| filter.matches(&file.name))
            .map(|file| -> Result<FileJob> {
                Ok(FileJob::new(&file.download_url, local_path(out_dir, &file.name)?).size(file.size))
            })
            .collect::<Result<Vec<_>>>()?;
        if jobs.is_empty() {
            return Ok(vec![TransferResult::noop(format!("no files in {listing_url} match the filter"))]);
        }
        let downloader = Downloader::new(ctx, ctx.target_budget(target), self.kind().resolver());
        Ok(downloader.fetch_all(jobs).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use harvest_fetch::testing::{MockHttpClient, MockRoute};
    use harvest_fetch::{ErrorKind, TransferStatus};

    use super::*;
    use crate::test_support::{context, execute};

    fn target(article: &str) -> Target {
        Target::new(
            "fig",
            DownloadSpec::Figshare(FigshareParams {
                article_id: Some(Identifier::new(article)),
                ..FigshareParams::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_article_files() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route(
            "https://api.figshare.com/v2/articles/77/files",
            MockRoute::json(
                r#"[
                    {"id": 1, "name": "a.txt", "size": 5, "download_url": "https://ndownloader.figshare.com/files/1"},
                    {"id": 2, "name": "b.txt", "size": 6, "download_url": "https://ndownloader.figshare.com/files/2"}
                ]"#,
            ),
        );
        client.route("https://ndownloader.figshare.com/files/1", MockRoute::ok(b"hello"));
        client.route("https://ndownloader.figshare.com/files/2", MockRoute::ok(b"hello!"));
        let ctx = context(dir.path(), execute(), client);
        let out = dir.path().join("out");

        let results = FigshareHandler.run(&ctx, &target("77"), &out).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == TransferStatus::Ok));
        assert_eq!(std::fs::read(out.join("b.txt")).unwrap(), b"hello!");
    }

    #[tokio::test]
    async fn test_listing_errors_surface() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://api.figshare.com/v2/articles/78/files", MockRoute::json(r#"{"message": "nope"}"#));
        let ctx = context(dir.path(), execute(), client);

        let err = FigshareHandler.run(&ctx, &target("78"), dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
        let err = FigshareHandler.run(&ctx, &target("79"), dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
    }
}
