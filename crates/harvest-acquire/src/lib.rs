//! Corpus acquisition runs: targets in, payload trees and manifests out.
//!
//! # Architecture
//!
//! - [`config`] - Config file, queue and run flags, resolved once per run
//! - [`context`] - Shared run state handed to every handler
//! - [`strategy`] - One handler per download strategy behind [`StrategyHandler`]
//! - [`orchestrator`] - One target: handler, status, manifest
//! - [`scheduler`] - All targets: sequential or bounded pool, run summary
//!
//! # Key Features
//!
//! - **Plan Mode**: without `execute` nothing touches the network or the
//!   payload tree; manifests list what would be fetched
//! - **Budgets**: per-target file/byte limits and a shared run byte budget;
//!   once the run budget is spent no new target starts
//! - **Contained Failures**: handler errors and panics become results, and a
//!   run always finishes with a summary
//! - **External Tools**: git, aws and aria2c run through [`ToolRunner`] so
//!   they can be scripted in tests

pub mod config;
pub mod context;
mod error;
pub mod manifest;
pub mod orchestrator;
pub mod scheduler;
pub mod strategy;
pub mod summary;
pub mod tool;

#[cfg(test)]
mod test_support;

pub use config::{ConfigFile, Format, Globals, RunConfig, RunFlags, Target, load_queue, parse_queue};
pub use context::{AcquireContext, ContextBuilder};
pub use error::{AcquireError, Result};
pub use manifest::{DONE_MARKER, MANIFEST_FILE, Manifest};
pub use orchestrator::{TargetOrchestrator, TargetReport};
pub use scheduler::RunScheduler;
pub use strategy::{DownloadSpec, StrategyHandler, StrategyKind, StrategyRegistry};
pub use summary::RunSummary;
pub use tool::{TokioToolRunner, ToolCommand, ToolOutput, ToolRunner};
