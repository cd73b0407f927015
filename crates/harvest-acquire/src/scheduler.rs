//! Run-level dispatch of targets.
//!
//! Sequential when `workers <= 1` or in plan mode, otherwise a
//! semaphore-bounded pool of spawned tasks. A target whose turn comes after
//! the run stopped (byte budget exhausted or interrupted) is listed as not
//! started. Reports keep configuration order regardless of completion order.

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use harvest_fetch::ErrorKind;
use tokio::sync::Semaphore;

use crate::config::Target;
use crate::context::AcquireContext;
use crate::orchestrator::{TargetOrchestrator, TargetReport};
use crate::strategy::StrategyRegistry;
use crate::summary::RunSummary;

#[derive(Debug, Clone)]
pub struct RunScheduler {
    orchestrator: TargetOrchestrator,
}

impl RunScheduler {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self {
            orchestrator: TargetOrchestrator::new(registry),
        }
    }

    /// Run every enabled target and write the summary. Always completes.
    pub async fn run(&self, ctx: Arc<AcquireContext>, targets: Vec<Target>) -> RunSummary {
        let started_at = Utc::now();
        let flags = &ctx.config().flags;
        let mut summary = RunSummary::new(started_at, flags.execute, ctx.config().globals.max_bytes_per_run);
        summary.targets_total = targets.len();

        let (enabled, disabled): (Vec<Target>, Vec<Target>) = targets.into_iter().partition(|t| t.enabled);
        summary.targets_disabled = disabled.len();
        for target in &disabled {
            tracing::debug!(target_id = %target.id, "target disabled");
        }

        let workers = flags.workers.max(1);
        tracing::info!(
            targets = enabled.len(),
            disabled = disabled.len(),
            workers,
            execute = flags.execute,
            "run started"
        );
        let reports = if workers == 1 || !flags.execute {
            self.run_sequential(&ctx, &enabled).await
        } else {
            self.run_pool(&ctx, &enabled, workers).await
        };

        for (target, report) in enabled.iter().zip(reports) {
            match report {
                Some(report) => summary.record(report),
                None => summary.not_started.push(target.id.clone()),
            }
        }
        summary.bytes_consumed = ctx.run_budget().consumed();
        summary.finished_at = Utc::now();

        match summary.write(&ctx.config().globals.logs_root) {
            Ok(path) => tracing::info!(path = %path.display(), "summary written"),
            Err(e) => tracing::warn!(error = %e, "failed to write run summary"),
        }
        tracing::info!(
            failed = summary.failed.len(),
            not_started = summary.not_started.len(),
            bytes = summary.bytes_consumed,
            "run finished"
        );
        summary
    }

    async fn run_sequential(&self, ctx: &AcquireContext, targets: &[Target]) -> Vec<Option<TargetReport>> {
        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            if ctx.is_stopped() {
                tracing::info!(target_id = %target.id, "run stopped, target not started");
                reports.push(None);
                continue;
            }
            reports.push(Some(self.orchestrator.run(ctx, target).await));
        }
        reports
    }

    async fn run_pool(&self, ctx: &Arc<AcquireContext>, targets: &[Target], workers: usize) -> Vec<Option<TargetReport>> {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut reports: Vec<Option<TargetReport>> = vec![None; targets.len()];
        let mut running = FuturesUnordered::new();

        for (index, target) in targets.iter().enumerate() {
            // Wait for a free slot before the budget check, so a unit that
            // exhausts the budget is seen before the next one starts.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if ctx.is_stopped() {
                tracing::info!(target_id = %target.id, "run stopped, target not started");
                continue;
            }
            let ctx = ctx.clone();
            let orchestrator = self.orchestrator.clone();
            let target = target.clone();
            let task = tokio::spawn(async move {
                let _permit = permit;
                orchestrator.run(&ctx, &target).await
            });
            running.push(async move { (index, task.await) });
        }

        while let Some((index, joined)) = running.next().await {
            reports[index] = Some(joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "target task failed");
                TargetReport::not_run(&targets[index].id, ErrorKind::HandlerPanicked, e.to_string())
            }));
        }
        reports
    }
}
