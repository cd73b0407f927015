//! Per-target and run-wide byte and file-count limits.
//!
//! A [`ByteBudget`] is shared by every worker of a run; a [`TargetBudget`]
//! layers one target's limits on top of it. Commits are compare-and-swap, so
//! concurrent callers can never jointly exceed a cap.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    Target,
    Run,
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BudgetScope::Target => "target",
            BudgetScope::Run => "run",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    #[error("file limit of {limit} reached before {label}")]
    FileLimit { label: String, limit: u64 },

    #[error("run byte budget exhausted before {label}")]
    RunExhausted { label: String },

    #[error("{label}: {bytes} bytes would exceed the {scope} byte budget ({remaining} remaining)")]
    WouldExceed {
        scope: BudgetScope,
        label: String,
        bytes: u64,
        remaining: u64,
    },
}

/// Monotonic byte counter with an optional cap.
#[derive(Debug, Default)]
pub struct ByteBudget {
    consumed: AtomicU64,
    cap: Option<u64>,
    stop: Option<CancellationToken>,
}

impl ByteBudget {
    pub fn new(cap: Option<u64>) -> Self {
        Self {
            consumed: AtomicU64::new(0),
            cap,
            stop: None,
        }
    }

    pub fn unbounded() -> Self { Self::new(None) }

    /// Cancel `stop` once the budget is exhausted.
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        if self.is_exhausted() {
            stop.cancel();
        }
        self.stop = Some(stop);
        self
    }

    pub fn cap(&self) -> Option<u64> { self.cap }

    pub fn consumed(&self) -> u64 { self.consumed.load(Ordering::Acquire) }

    /// `None` when unbounded.
    pub fn remaining(&self) -> Option<u64> { self.cap.map(|cap| cap.saturating_sub(self.consumed())) }

    pub fn is_exhausted(&self) -> bool { self.cap.is_some_and(|cap| self.consumed() >= cap) }

    /// Commit `bytes` if they fit under the cap.
    pub fn try_consume(&self, bytes: u64) -> bool {
        let Some(cap) = self.cap else {
            self.consumed.fetch_add(bytes, Ordering::AcqRel);
            return true;
        };
        let committed = self
            .consumed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(bytes).filter(|next| *next <= cap)
            });
        match committed {
            Ok(previous) => {
                if previous + bytes >= cap {
                    self.signal_exhausted();
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Undo a previous successful [`try_consume`](Self::try_consume).
    pub fn release(&self, bytes: u64) {
        let _ = self
            .consumed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    fn signal_exhausted(&self) {
        match &self.stop {
            Some(stop) if !stop.is_cancelled() => {
                tracing::info!(cap = self.cap, "run byte budget exhausted, stopping new work");
                stop.cancel();
            }
            _ => {}
        }
    }
}

/// One target's file and byte limits, backed by the shared run budget.
#[derive(Debug)]
pub struct TargetBudget {
    label: String,
    max_files: Option<u64>,
    files_started: AtomicU64,
    bytes: ByteBudget,
    run: Arc<ByteBudget>,
}

impl TargetBudget {
    pub fn new(
        label: impl Into<String>,
        max_files: Option<u64>,
        max_bytes: Option<u64>,
        run: Arc<ByteBudget>,
    ) -> Self {
        Self {
            label: label.into(),
            max_files,
            files_started: AtomicU64::new(0),
            bytes: ByteBudget::new(max_bytes),
            run,
        }
    }

    pub fn label(&self) -> &str { &self.label }

    pub fn files_started(&self) -> u64 { self.files_started.load(Ordering::Acquire) }

    pub fn bytes_recorded(&self) -> u64 { self.bytes.consumed() }

    pub fn run(&self) -> &Arc<ByteBudget> { &self.run }

    /// Reserve a file slot for `file`.
    pub fn start_file(&self, file: &str) -> Result<(), BudgetError> {
        if self.run.is_exhausted() {
            return Err(BudgetError::RunExhausted {
                label: self.describe(file),
            });
        }
        let Some(limit) = self.max_files else {
            self.files_started.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };
        self.files_started
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |started| {
                (started < limit).then_some(started + 1)
            })
            .map(|_| ())
            .map_err(|_| BudgetError::FileLimit {
                label: self.describe(file),
                limit,
            })
    }

    /// Reject a declared size that cannot fit before any bytes move.
    pub fn check_size_hint(&self, bytes: u64, file: &str) -> Result<(), BudgetError> {
        for (scope, remaining) in [
            (BudgetScope::Target, self.bytes.remaining()),
            (BudgetScope::Run, self.run.remaining()),
        ] {
            match remaining {
                Some(remaining) if bytes > remaining => {
                    return Err(BudgetError::WouldExceed {
                        scope,
                        label: self.describe(file),
                        bytes,
                        remaining,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Commit bytes of a finished artifact: target first, then run.
    ///
    /// On error nothing stays committed and the caller removes the artifact.
    pub fn record_bytes(&self, bytes: u64, file: &str) -> Result<(), BudgetError> {
        if !self.bytes.try_consume(bytes) {
            return Err(self.would_exceed(BudgetScope::Target, bytes, file));
        }
        if !self.run.try_consume(bytes) {
            self.bytes.release(bytes);
            return Err(self.would_exceed(BudgetScope::Run, bytes, file));
        }
        Ok(())
    }

    /// Tightest remaining byte allowance, used as an in-stream cap.
    pub fn remaining(&self) -> Option<u64> {
        match (self.bytes.remaining(), self.run.remaining()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn would_exceed(&self, scope: BudgetScope, bytes: u64, file: &str) -> BudgetError {
        let remaining = match scope {
            BudgetScope::Target => self.bytes.remaining(),
            BudgetScope::Run => self.run.remaining(),
        };
        BudgetError::WouldExceed {
            scope,
            label: self.describe(file),
            bytes,
            remaining: remaining.unwrap_or(u64::MAX),
        }
    }

    fn describe(&self, file: &str) -> String { format!("{}/{}", self.label, file) }
}
