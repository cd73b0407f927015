//! Per-target manifest and completion marker.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harvest_fetch::{TransferResult, TransferStatus};
use harvest_fs::AtomicWriteOptions;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::strategy::StrategyKind;

pub const MANIFEST_FILE: &str = "download_manifest.json";
pub const DONE_MARKER: &str = "acquire_done.json";

/// What one target run produced. Field order is the on-disk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub target_id: String,
    pub strategy: StrategyKind,
    pub bucket: String,
    pub pool: String,
    pub execute: bool,
    pub status: TransferStatus,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<TransferResult>,
}

#[derive(Debug, Serialize)]
struct DoneMarker<'a> {
    target_id: &'a str,
    status: TransferStatus,
    finished_at: DateTime<Utc>,
    manifest: &'a Path,
}

/// `ok` when anything succeeded, otherwise the first result's status.
pub fn aggregate_status(results: &[TransferResult]) -> TransferStatus {
    if results.iter().any(|r| r.status == TransferStatus::Ok) {
        return TransferStatus::Ok;
    }
    results.first().map(|r| r.status).unwrap_or(TransferStatus::Failed)
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    bytes.push(b'\n');
    harvest_fs::atomic_write(path, &bytes, AtomicWriteOptions::new().create_parents(true))?;
    Ok(())
}

impl Manifest {
    /// Write `download_manifest.json` under `dir`, returning its path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        write_json(&path, self)?;
        Ok(path)
    }

    pub fn write_done_marker(&self, dir: &Path, manifest: &Path) -> Result<PathBuf> {
        let path = dir.join(DONE_MARKER);
        let marker = DoneMarker {
            target_id: &self.target_id,
            status: self.status,
            finished_at: self.finished_at,
            manifest,
        };
        write_json(&path, &marker)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = harvest_fs::atomic_read(path)?;
        serde_json::from_slice(&bytes).map_err(|source| crate::error::AcquireError::Json {
            url: path.display().to_string(),
            source,
        })
    }
}
