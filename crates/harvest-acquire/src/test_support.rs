//! Fixtures shared by the unit tests.

use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use harvest_fetch::ManualClock;
use harvest_fetch::net::StaticResolver;
use harvest_fetch::testing::MockHttpClient;
use tokio_util::sync::CancellationToken;

use crate::config::{Globals, RunConfig, RunFlags};
use crate::context::AcquireContext;
use crate::error::Result;
use crate::tool::{ToolCommand, ToolOutput, ToolRunner};

pub(crate) const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

pub(crate) fn resolver() -> StaticResolver {
    let public: IpAddr = "93.184.216.34".parse().unwrap();
    let private: IpAddr = "10.0.0.5".parse().unwrap();
    let mut resolver = StaticResolver::new();
    for host in [
        "example.org",
        "cdn.example",
        "zenodo.org",
        "api.figshare.com",
        "ndownloader.figshare.com",
        "api.github.com",
        "github.com",
        "objects.githubusercontent.com",
        "dataverse.harvard.edu",
        "huggingface.co",
    ] {
        resolver = resolver.with(host, &[public]);
    }
    resolver.with("private.example", &[private])
}

pub(crate) fn globals(root: &Path) -> Globals {
    Globals {
        raw_root: root.join("raw"),
        manifests_root: root.join("manifests"),
        logs_root: root.join("logs"),
        ..Globals::default()
    }
}

pub(crate) fn execute() -> RunFlags { RunFlags::default().execute(true) }

pub(crate) fn context_with(
    globals: Globals,
    flags: RunFlags,
    client: Arc<MockHttpClient>,
    tools: Arc<FakeTools>,
) -> AcquireContext {
    AcquireContext::builder(RunConfig::new(globals, flags))
        .http_client(client)
        .resolver(Arc::new(resolver()))
        .tool_runner(tools)
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap()
}

pub(crate) fn context(root: &Path, flags: RunFlags, client: Arc<MockHttpClient>) -> AcquireContext {
    context_with(globals(root), flags, client, Arc::new(FakeTools::default()))
}

type Script = Box<dyn Fn(&ToolCommand) -> ToolOutput + Send + Sync>;

/// Records commands and answers them from a script; exit 0 by default.
#[derive(Default)]
pub(crate) struct FakeTools {
    script: Option<Script>,
    calls: Mutex<Vec<ToolCommand>>,
}

impl FakeTools {
    pub fn scripted(script: impl Fn(&ToolCommand) -> ToolOutput + Send + Sync + 'static) -> Self {
        Self {
            script: Some(Box::new(script)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ToolCommand> { self.calls.lock().unwrap().clone() }
}

pub(crate) fn exit(status: i32, stdout: &str) -> ToolOutput {
    ToolOutput {
        status: Some(status),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn run(&self, command: &ToolCommand, _stop: &CancellationToken) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(command.clone());
        Ok(match &self.script {
            Some(script) => script(command),
            None => exit(0, ""),
        })
    }
}
