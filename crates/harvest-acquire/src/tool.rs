//! External tools (git, aws, aria2c) behind an injectable runner.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{AcquireError, Result};

/// A program invocation, built up like a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str { &self.program }

    pub fn get_args(&self) -> &[String] { &self.args }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool { self.status == Some(0) }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion, or until `stop` fires.
    async fn run(&self, command: &ToolCommand, stop: &CancellationToken) -> Result<ToolOutput>;

    /// [`run`](Self::run), treating a non-zero exit as [`AcquireError::Tool`].
    async fn run_checked(&self, command: &ToolCommand, stop: &CancellationToken) -> Result<ToolOutput> {
        let output = self.run(command, stop).await?;
        if output.success() {
            return Ok(output);
        }
        let detail = output.stderr.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or_default();
        Err(AcquireError::Tool {
            tool: command.program().to_string(),
            message: match output.status {
                Some(code) => format!("exit status {code}: {detail}"),
                None => format!("terminated by signal: {detail}"),
            },
        })
    }
}

/// Spawns real processes. A stopped run drops the child, which kills it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioToolRunner;

#[async_trait]
impl ToolRunner for TokioToolRunner {
    async fn run(&self, command: &ToolCommand, stop: &CancellationToken) -> Result<ToolOutput> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            process.current_dir(dir);
        }
        for (key, value) in &command.env {
            process.env(key, value);
        }

        tracing::debug!(command = %command, "running tool");
        let child = process.spawn().map_err(|e| AcquireError::Tool {
            tool: command.program.clone(),
            message: format!("failed to start: {e}"),
        })?;
        let output = tokio::select! {
            _ = stop.cancelled() => return Err(AcquireError::Cancelled),
            output = child.wait_with_output() => output?,
        };
        Ok(ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
