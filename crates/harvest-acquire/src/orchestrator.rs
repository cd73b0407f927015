//! One target, start to finish: output directory, handler invocation,
//! status aggregation and manifest.
//!
//! This is the only place handler errors and panics are turned into
//! results; [`TargetOrchestrator::run`] never fails.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use harvest_fetch::{ErrorKind, TransferResult, TransferStatus};
use serde::Serialize;

use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};
use crate::manifest::{Manifest, aggregate_status};
use crate::strategy::StrategyRegistry;

/// Outcome of one target, as listed in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetReport {
    pub id: String,
    pub status: TransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    /// First error message among the results, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bytes: u64,
}

impl TargetReport {
    pub(crate) fn not_run(id: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status: TransferStatus::Error,
            manifest: None,
            error: Some(format!("{kind}: {}", message.into())),
            bytes: 0,
        }
    }

    pub fn is_failure(&self) -> bool { self.status.is_failure() }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

#[derive(Debug, Clone)]
pub struct TargetOrchestrator {
    registry: Arc<StrategyRegistry>,
}

impl TargetOrchestrator {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self { Self { registry } }

    pub async fn run(&self, ctx: &AcquireContext, target: &Target) -> TargetReport {
        let started_at = Utc::now();
        let kind = target.download.kind();
        tracing::info!(target_id = %target.id, strategy = %kind, execute = ctx.config().flags.execute, "target started");

        let (out_dir, results) = match self.prepare(ctx, target).await {
            Ok(dir) => {
                let results = self.invoke(ctx, target, &dir).await;
                (dir, results)
            }
            Err(e) => {
                tracing::warn!(target_id = %target.id, error = %e, "output directory unavailable");
                let dir = ctx
                    .config()
                    .output_dir(target)
                    .unwrap_or_else(|_| ctx.config().globals.raw_root.clone());
                (dir, vec![TransferResult::error(e.kind(), e.to_string())])
            }
        };
        let status = aggregate_status(&results);
        let bytes: u64 = results
            .iter()
            .filter(|r| r.status == TransferStatus::Ok)
            .filter_map(|r| r.content_length)
            .sum();
        let error = results.iter().find_map(|r| {
            r.error_kind
                .map(|kind| format!("{kind}: {}", r.error.as_deref().unwrap_or_default()))
        });

        let manifest = Manifest {
            target_id: target.id.clone(),
            strategy: kind,
            bucket: ctx.config().bucket(target).to_string(),
            pool: ctx.config().pool(target).to_string(),
            execute: ctx.config().flags.execute,
            status,
            output_dir: out_dir,
            started_at,
            finished_at: Utc::now(),
            results,
        };
        let manifest_path = match self.write_manifest(ctx, target, &manifest) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(target_id = %target.id, error = %e, "failed to write manifest");
                None
            }
        };

        tracing::info!(target_id = %target.id, status = %status, bytes, "target finished");
        TargetReport {
            id: target.id.clone(),
            status,
            manifest: manifest_path,
            error,
            bytes,
        }
    }

    async fn prepare(&self, ctx: &AcquireContext, target: &Target) -> Result<PathBuf> {
        let out_dir = ctx.config().output_dir(target)?;
        if ctx.config().flags.execute {
            tokio::fs::create_dir_all(&out_dir).await?;
        }
        Ok(out_dir)
    }

    async fn invoke(&self, ctx: &AcquireContext, target: &Target, out_dir: &Path) -> Vec<TransferResult> {
        let kind = target.download.kind();
        let Some(handler) = self.registry.get(kind) else {
            let e = AcquireError::MissingHandler(kind);
            return vec![TransferResult::error(e.kind(), e.to_string())];
        };

        match AssertUnwindSafe(handler.run(ctx, target, out_dir)).catch_unwind().await {
            Ok(Ok(results)) if results.is_empty() => {
                tracing::warn!(target_id = %target.id, "handler returned no results");
                vec![TransferResult::failed(
                    ErrorKind::HandlerReturnedNoResults,
                    format!("{kind} handler returned no results"),
                )]
            }
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                tracing::warn!(target_id = %target.id, error = %e, "handler failed");
                vec![TransferResult::error(e.kind(), e.to_string())]
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(target_id = %target.id, panic = %message, "handler panicked");
                vec![TransferResult::error(ErrorKind::HandlerPanicked, message)]
            }
        }
    }

    fn write_manifest(&self, ctx: &AcquireContext, target: &Target, manifest: &Manifest) -> Result<PathBuf> {
        let dir = ctx.config().manifest_dir(target)?;
        let path = manifest.write(&dir)?;
        if ctx.config().flags.execute {
            manifest.write_done_marker(&dir, &path)?;
        }
        Ok(path)
    }
}
