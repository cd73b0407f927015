use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::{TransferResult, filename_from_url};
use serde::Deserialize;
use url::Url;

use super::files::{Downloader, FileJob, Protocol, local_path};
use super::{DownloadSpec, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};

/// `base_url` plus `files`, or a single `url`. Credentials in the URL win
/// over `username`/`password`; anonymous otherwise.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FtpParams {
    pub base_url: Option<String>,
    pub files: Vec<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl FtpParams {
    fn urls(&self) -> Result<Vec<String>> {
        let mut urls: Vec<String> = self.url.iter().cloned().collect();
        if let Some(base) = &self.base_url {
            let mut base = base.clone();
            if !base.ends_with('/') {
                base.push('/');
            }
            let base = Url::parse(&base).map_err(|e| AcquireError::Config(format!("invalid base_url '{base}': {e}")))?;
            for file in &self.files {
                let url = base
                    .join(file.trim_start_matches('/'))
                    .map_err(|e| AcquireError::Config(format!("invalid file '{file}': {e}")))?;
                urls.push(url.to_string());
            }
        }
        if urls.is_empty() {
            return Err(AcquireError::missing("ftp strategy needs `url` or `base_url` with `files`"));
        }
        Ok(urls)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FtpHandler;

#[async_trait]
impl StrategyHandler for FtpHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::Ftp }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::Ftp(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let mut jobs = Vec::new();
        for (index, url) in params.urls()?.into_iter().enumerate() {
            let name = filename_from_url(&url).unwrap_or_else(|| format!("download_{index}"));
            jobs.push(FileJob::new(url, local_path(out_dir, &name)?));
        }
        let credentials = params
            .username
            .clone()
            .map(|user| (user, params.password.clone().unwrap_or_default()));
        let downloader = Downloader::new(ctx, ctx.target_budget(target), self.kind().resolver())
            .protocol(Protocol::Ftp { credentials });
        Ok(downloader.fetch_all(jobs).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use harvest_fetch::testing::MockHttpClient;
    use harvest_fetch::{ErrorKind, TransferStatus};

    use super::*;
    use crate::config::RunFlags;
    use crate::test_support::{context, execute};

    #[test]
    fn test_urls_from_base() {
        let params = FtpParams {
            base_url: Some("ftp://ftp.example.org/pub/data".into()),
            files: vec!["a.gz".into(), "/b.gz".into()],
            ..FtpParams::default()
        };
        assert_eq!(
            params.urls().unwrap(),
            vec!["ftp://ftp.example.org/pub/data/a.gz", "ftp://ftp.example.org/pub/data/b.gz"]
        );
        assert!(FtpParams::default().urls().is_err());
    }

    #[tokio::test]
    async fn test_plan_mode() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), RunFlags::default(), Arc::new(MockHttpClient::new()));
        let params = FtpParams {
            url: Some("ftp://ftp.example.org/pub/x.txt".into()),
            ..FtpParams::default()
        };
        let results = FtpHandler
            .run(&ctx, &Target::new("f", DownloadSpec::Ftp(params)), dir.path())
            .await
            .unwrap();
        assert_eq!(results[0].status, TransferStatus::Planned);
        assert_eq!(results[0].path.as_deref(), Some(dir.path().join("x.txt").as_path()));
    }

    #[tokio::test]
    async fn test_private_ftp_host_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), execute(), Arc::new(MockHttpClient::new()));
        let params = FtpParams {
            url: Some("ftp://10.1.2.3/pub/x.txt".into()),
            ..FtpParams::default()
        };
        let results = FtpHandler
            .run(&ctx, &Target::new("f", DownloadSpec::Ftp(params)), dir.path())
            .await
            .unwrap();
        assert_eq!(results[0].error_kind, Some(ErrorKind::BlockedUrl));
    }
}
