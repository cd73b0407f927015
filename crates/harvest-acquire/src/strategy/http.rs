use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::{TransferResult, filename_from_url};
use serde::Deserialize;

use super::files::{Downloader, FileJob, local_path, parse_sha256};
use super::{DownloadSpec, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};

/// Plain URLs. `filename`, `expected_sha256` and `expected_size` apply only
/// when exactly one URL is given.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpParams {
    pub url: Option<String>,
    pub urls: Vec<String>,
    pub filename: Option<String>,
    #[serde(alias = "sha256")]
    pub expected_sha256: Option<String>,
    #[serde(alias = "size")]
    pub expected_size: Option<u64>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpHandler;

impl HttpHandler {
    fn jobs(params: &HttpParams, out_dir: &Path) -> Result<Vec<FileJob>> {
        let urls: Vec<&str> = params.url.iter().chain(&params.urls).map(String::as_str).collect();
        if urls.is_empty() {
            return Err(AcquireError::missing("http strategy needs `url` or `urls`"));
        }
        let single = urls.len() == 1;
        let sha256 = parse_sha256(params.expected_sha256.as_deref())?;
        let headers: Vec<(String, String)> = params.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let mut jobs = Vec::with_capacity(urls.len());
        for (index, url) in urls.into_iter().enumerate() {
            let name = match &params.filename {
                Some(name) if single => name.clone(),
                _ => filename_from_url(url).unwrap_or_else(|| format!("download_{index}")),
            };
            let mut job = FileJob::new(url, local_path(out_dir, &name)?).headers(headers.clone());
            if single {
                job = job.size(params.expected_size).sha256(sha256);
            }
            jobs.push(job);
        }
        Ok(jobs)
    }
}

#[async_trait]
impl StrategyHandler for HttpHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::Http }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::Http(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let jobs = Self::jobs(params, out_dir)?;
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
    use crate::config::RunFlags;
    use crate::test_support::{HELLO_SHA, context, execute};

    fn target(params: HttpParams) -> Target { Target::new("web", DownloadSpec::Http(params)) }

    fn hello() -> HttpParams {
        HttpParams {
            url: Some("https://example.org/files/hello.txt".into()),
            expected_sha256: Some(HELLO_SHA.into()),
            ..HttpParams::default()
        }
    }

    #[tokio::test]
    async fn test_download_then_cached() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://example.org/files/hello.txt", MockRoute::ok(b"hello"));
        let ctx = context(dir.path(), execute(), client.clone());
        let out = dir.path().join("out");

        let results = HttpHandler.run(&ctx, &target(hello()), &out).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TransferStatus::Ok);
        assert_eq!(results[0].sha256.as_deref(), Some(HELLO_SHA));
        assert_eq!(std::fs::read(out.join("hello.txt")).unwrap(), b"hello");

        let again = HttpHandler.run(&ctx, &target(hello()), &out).await.unwrap();
        assert_eq!(again[0].status, TransferStatus::Cached);
        assert_eq!(again[0].sha256.as_deref(), Some(HELLO_SHA));
        assert_eq!(client.call_count("https://example.org/files/hello.txt"), 1);
    }

    #[tokio::test]
    async fn test_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        client.route("https://example.org/files/hello.txt", MockRoute::ok(b"hello!"));
        let ctx = context(dir.path(), execute(), client);
        let out = dir.path().join("out");

        let results = HttpHandler.run(&ctx, &target(hello()), &out).await.unwrap();
        assert_eq!(results[0].status, TransferStatus::Error);
        assert_eq!(results[0].error_kind, Some(ErrorKind::Sha256Mismatch));
        assert!(!out.join("hello.txt").exists());
        assert!(!out.join("hello.txt.part").exists());
    }

    #[tokio::test]
    async fn test_plan_mode_is_offline() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        let ctx = context(dir.path(), RunFlags::default(), client.clone());
        let out = dir.path().join("out");

        let params = HttpParams {
            urls: vec!["https://example.org/a.csv".into(), "https://example.org/b.csv".into()],
            ..HttpParams::default()
        };
        let results = HttpHandler.run(&ctx, &target(params), &out).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == TransferStatus::Planned));
        assert_eq!(results[1].path.as_deref(), Some(out.join("b.csv").as_path()));
        assert!(client.calls().is_empty());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_target_byte_limit_stops_further_files() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        for name in ["a", "b", "c"] {
            client.route(&format!("https://example.org/{name}.bin"), MockRoute::ok(&[7u8; 600]));
        }
        let ctx = context(dir.path(), execute(), client.clone());
        let out = dir.path().join("out");

        let params = HttpParams {
            urls: ["a", "b", "c"].iter().map(|n| format!("https://example.org/{n}.bin")).collect(),
            ..HttpParams::default()
        };
        let target = target(params).limits(None, Some(1000));
        let results = HttpHandler.run(&ctx, &target, &out).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, TransferStatus::Ok);
        assert_eq!(results[1].error_kind, Some(ErrorKind::LimitExceeded));
        assert!(!out.join("b.bin").exists());
        assert_eq!(client.call_count("https://example.org/c.bin"), 0);
    }

    #[tokio::test]
    async fn test_missing_url() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), execute(), Arc::new(MockHttpClient::new()));
        let err = HttpHandler
            .run(&ctx, &target(HttpParams::default()), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingConfiguration);
    }

    #[tokio::test]
    async fn test_private_host_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::new());
        let ctx = context(dir.path(), execute(), client.clone());
        let params = HttpParams {
            url: Some("http://private.example/secret".into()),
            ..HttpParams::default()
        };
        let results = HttpHandler.run(&ctx, &target(params), dir.path()).await.unwrap();
        assert_eq!(results[0].error_kind, Some(ErrorKind::BlockedUrl));
        assert!(client.calls().is_empty());
    }
}
