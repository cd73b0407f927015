mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use harvest_acquire::{AcquireContext, RunScheduler, RunSummary, StrategyRegistry};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

/// Exit code for anything that prevents the run from starting.
const STARTUP_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let strict = cli.strict;
    match run(cli).await {
        Ok(summary) => ExitCode::from(summary.exit_code(strict) as u8),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("harvest: {e:#}");
            ExitCode::from(STARTUP_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunSummary> {
    let (config, targets) = cli.load()?;
    let registry = Arc::new(StrategyRegistry::builtin());
    registry.validate_targets(&targets)?;

    let ctx = Arc::new(AcquireContext::builder(config).tokens_from_env().build()?);

    let stop = ctx.stop().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing in-flight targets");
            stop.cancel();
        }
    });

    Ok(RunScheduler::new(registry).run(ctx, targets).await)
}
