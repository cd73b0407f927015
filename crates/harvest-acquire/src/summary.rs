//! Run summary written once per run under the logs root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harvest_fs::AtomicWriteOptions;
use serde::Serialize;

use crate::error::Result;
use crate::orchestrator::TargetReport;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTarget {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub execute: bool,
    pub targets_total: usize,
    pub targets_disabled: usize,
    /// Target count per status.
    pub counts: BTreeMap<String, usize>,
    pub failed: Vec<FailedTarget>,
    /// Targets skipped because the run stopped before their turn.
    pub not_started: Vec<String>,
    pub bytes_consumed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes_per_run: Option<u64>,
    /// In configuration order.
    pub targets: Vec<TargetReport>,
}

impl RunSummary {
    pub(crate) fn new(started_at: DateTime<Utc>, execute: bool, max_bytes_per_run: Option<u64>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            execute,
            targets_total: 0,
            targets_disabled: 0,
            counts: BTreeMap::new(),
            failed: Vec::new(),
            not_started: Vec::new(),
            bytes_consumed: 0,
            max_bytes_per_run,
            targets: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, report: TargetReport) {
        *self.counts.entry(report.status.to_string()).or_default() += 1;
        if report.is_failure() {
            self.failed.push(FailedTarget {
                id: report.id.clone(),
                status: report.status.to_string(),
                error: report.error.clone(),
            });
        }
        self.targets.push(report);
    }

    pub fn has_failures(&self) -> bool { !self.failed.is_empty() }

    /// 1 only when `strict` and some target failed.
    pub fn exit_code(&self, strict: bool) -> i32 {
        if strict && self.has_failures() { 1 } else { 0 }
    }

    pub fn file_name(&self) -> String {
        format!("acquire_summary_{}.json", self.finished_at.format("%Y%m%dT%H%M%SZ"))
    }

    /// Write the summary atomically under `logs_root`, returning its path.
    pub fn write(&self, logs_root: &Path) -> Result<PathBuf> {
        let path = logs_root.join(self.file_name());
        let mut bytes = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        bytes.push(b'\n');
        harvest_fs::atomic_write(&path, &bytes, AtomicWriteOptions::new().create_parents(true))?;
        Ok(path)
    }
}
