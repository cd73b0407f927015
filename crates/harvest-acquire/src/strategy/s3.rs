use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::TransferResult;
use serde::Deserialize;

use super::files::record_tree;
use super::{DownloadSpec, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};
use crate::tool::ToolCommand;

/// Objects copied with the `aws` CLI. `keys` are copied one by one; a
/// `prefix` is synced as a tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct S3Params {
    pub bucket: Option<String>,
    pub keys: Vec<String>,
    pub prefix: Option<String>,
    pub region: Option<String>,
    pub no_sign_request: bool,
}

impl Default for S3Params {
    fn default() -> Self {
        Self {
            bucket: None,
            keys: Vec::new(),
            prefix: None,
            region: None,
            no_sign_request: true,
        }
    }
}

impl S3Params {
    fn common_flags(&self) -> Vec<String> {
        let mut flags = vec!["--only-show-errors".to_string()];
        if self.no_sign_request {
            flags.push("--no-sign-request".into());
        }
        if let Some(region) = &self.region {
            flags.push("--region".into());
            flags.push(region.clone());
        }
        flags
    }

    fn commands(&self, bucket: &str, out_dir: &Path) -> Result<Vec<ToolCommand>> {
        let out = out_dir.to_string_lossy();
        let mut commands = Vec::new();
        for key in &self.keys {
            let key = key.trim_start_matches('/');
            if key.is_empty() || key.split('/').any(|part| part == "..") {
                return Err(AcquireError::Config(format!("invalid S3 key '{key}'")));
            }
            let dest = match key.rsplit_once('/') {
                Some((dir, _)) => format!("{out}/{dir}/"),
                None => format!("{out}/"),
            };
            commands.push(
                ToolCommand::new("aws")
                    .args(["s3", "cp"])
                    .arg(format!("s3://{bucket}/{key}"))
                    .arg(dest)
                    .args(self.common_flags()),
            );
        }
        if let Some(prefix) = &self.prefix {
            let prefix = prefix.trim_start_matches('/');
            commands.push(
                ToolCommand::new("aws")
                    .args(["s3", "sync"])
                    .arg(format!("s3://{bucket}/{prefix}"))
                    .arg(out.into_owned())
                    .args(self.common_flags()),
            );
        }
        if commands.is_empty() {
            return Err(AcquireError::missing("s3 strategy needs `keys` or `prefix`"));
        }
        Ok(commands)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct S3Handler;

#[async_trait]
impl StrategyHandler for S3Handler {
    fn kind(&self) -> StrategyKind { StrategyKind::S3 }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::S3(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let bucket = params
            .bucket
            .as_deref()
            .ok_or_else(|| AcquireError::missing("s3 strategy needs `bucket`"))?;
        let commands = params.commands(bucket, out_dir)?;
        let source = format!("s3://{bucket}");
        if !ctx.config().flags.execute {
            return Ok(vec![TransferResult::planned(source, Some(out_dir.to_path_buf()))]);
        }

        tokio::fs::create_dir_all(out_dir).await?;
        for command in &commands {
            ctx.tools().run_checked(command, ctx.stop()).await?;
        }
        let results = record_tree(&ctx.target_budget(target), out_dir, &source, &[]).await?;
        tracing::info!(target_id = %target.id, files = results.len(), "s3 copy recorded");
        Ok(results)
    }
}
