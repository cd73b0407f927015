use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use harvest_acquire::{ConfigFile, RunConfig, RunFlags, Target, load_queue};

/// Fetch the targets named in a config file into the raw tree.
///
/// Without `--execute` the run only plans: manifests list what would be
/// fetched and nothing touches the network.
#[derive(Debug, Parser)]
#[command(name = "harvest", version, about)]
pub struct Cli {
    /// Config file (`.toml` or `.json`)
    pub config: PathBuf,

    /// Download for real instead of planning
    #[arg(long)]
    pub execute: bool,

    /// Replace payloads that already exist
    #[arg(long)]
    pub overwrite: bool,

    /// Discard partial downloads instead of resuming them
    #[arg(long)]
    pub no_resume: bool,

    /// Skip checksum verification
    #[arg(long)]
    pub no_verify: bool,

    /// Targets run concurrently
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Byte budget shared by every target in the run
    #[arg(long)]
    pub max_bytes_per_run: Option<u64>,

    /// Allow private, loopback and other non-global addresses
    #[arg(long)]
    pub allow_non_global_hosts: bool,

    /// Exit with 1 when any target fails
    #[arg(long)]
    pub strict: bool,

    /// JSON-lines queue of extra targets
    #[arg(long = "targets", value_name = "QUEUE")]
    pub queue: Option<PathBuf>,

    /// Run only these target ids
    #[arg(long = "only", value_name = "ID")]
    pub only: Vec<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn flags(&self) -> RunFlags {
        RunFlags {
            execute: self.execute,
            overwrite: self.overwrite,
            resume: !self.no_resume,
            verify_checksums: !self.no_verify,
            workers: self.workers.max(1),
            strict: self.strict,
        }
    }

    /// Load the config and queue, apply command-line overrides and the
    /// `--only` filter.
    pub fn load(&self) -> anyhow::Result<(RunConfig, Vec<Target>)> {
        let mut file = ConfigFile::load(&self.config)
            .with_context(|| format!("failed to load config '{}'", self.config.display()))?;
        if let Some(queue) = &self.queue {
            let queued = load_queue(queue).with_context(|| format!("failed to load queue '{}'", queue.display()))?;
            tracing::debug!(count = queued.len(), queue = %queue.display(), "queue loaded");
            file.extend_targets(queued)?;
        }

        let mut globals = file.globals;
        if self.max_bytes_per_run.is_some() {
            globals.max_bytes_per_run = self.max_bytes_per_run;
        }
        if self.allow_non_global_hosts {
            globals.allow_non_global_hosts = true;
        }

        let targets = select(file.targets, &self.only)?;
        Ok((RunConfig::new(globals, self.flags()), targets))
    }
}

/// Keep only the ids in `only`, in config order. An empty filter keeps all.
fn select(targets: Vec<Target>, only: &[String]) -> anyhow::Result<Vec<Target>> {
    if only.is_empty() {
        return Ok(targets);
    }
    for id in only {
        if !targets.iter().any(|t| &t.id == id) {
            tracing::warn!(target_id = %id, "--only names an unknown target");
        }
    }
    let selected: Vec<Target> = targets.into_iter().filter(|t| only.contains(&t.id)).collect();
    if selected.is_empty() {
        bail!("--only matched no targets");
    }
    Ok(selected)
}
