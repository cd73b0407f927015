use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::TransferResult;
use serde::Deserialize;
use url::form_urlencoded;

use super::files::{Downloader, FileJob, GlobSet, local_path, parse_sha256};
use super::{DownloadSpec, StrategyHandler, StrategyKind, mismatch};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};

const DEFAULT_SERVER: &str = "https://dataverse.harvard.edu";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DataverseParams {
    /// e.g. `doi:10.7910/DVN/XXXXXX`
    pub persistent_id: Option<String>,
    pub server: Option<String>,
    /// Filters over `directoryLabel/filename`.
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Dataset,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Dataset {
    latest_version: Version,
}

#[derive(Debug, Deserialize)]
struct Version {
    #[serde(default)]
    files: Vec<VersionFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionFile {
    #[serde(default)]
    directory_label: Option<String>,
    data_file: DataFile,
}

#[derive(Debug, Deserialize)]
struct DataFile {
    id: u64,
    filename: String,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    checksum: Option<Checksum>,
}

#[derive(Debug, Deserialize)]
struct Checksum {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

impl VersionFile {
    fn relative_name(&self) -> String {
        match self.directory_label.as_deref().filter(|label| !label.is_empty()) {
            Some(label) => format!("{label}/{}", self.data_file.filename),
            None => self.data_file.filename.clone(),
        }
    }

    fn sha256(&self) -> Option<&str> {
        self.data_file
            .checksum
            .as_ref()
            .filter(|c| c.kind.eq_ignore_ascii_case("SHA-256"))
            .map(|c| c.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataverseHandler;

#[async_trait]
impl StrategyHandler for DataverseHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::Dataverse }

    async fn run(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Result<Vec<TransferResult>> {
        let DownloadSpec::Dataverse(params) = &target.download else {
            return Err(mismatch(self.kind(), target));
        };
        let pid = params
            .persistent_id
            .as_deref()
            .ok_or_else(|| AcquireError::missing("dataverse strategy needs `persistent_id`"))?;
        let server = params.server.as_deref().unwrap_or(DEFAULT_SERVER).trim_end_matches('/');
        let encoded: String = form_urlencoded::byte_serialize(pid.trim().as_bytes()).collect();
        let dataset_url = format!("{server}/api/datasets/:persistentId/?persistentId={encoded}");
        let filter = GlobSet::new(&params.files)?;
        if !ctx.config().flags.execute {
            return Ok(vec![TransferResult::planned(dataset_url, Some(out_dir.to_path_buf()))]);
        }

        let envelope: Envelope = ctx.get_json(&dataset_url, &[], self.kind().resolver()).await?;
        let mut jobs = Vec::new();
        for file in &envelope.data.latest_version.files {
            let name = file.relative_name();
            if !filter.matches(&name) {
                continue;
            }
            let url = format!("{server}/api/access/datafile/{}", file.data_file.id);
            jobs.push(
                FileJob::new(url, local_path(out_dir, &name)?)
                    .size(file.data_file.filesize)
                    .sha256(parse_sha256(file.sha256())?),
            );
        }
        if jobs.is_empty() {
            return Ok(vec![TransferResult::noop(format!("no files of {pid} match the filter"))]);
        }
        let downloader = Downloader::new(ctx, ctx.target_budget(target), self.kind().resolver());
        Ok(downloader.fetch_all(jobs).await)
    }
}
