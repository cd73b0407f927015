//! Run configuration: the `globals` table, targets, run flags and the
//! JSON-lines target queue.
//!
//! Every default and alias is resolved here, once, so the rest of the crate
//! reads plain fields.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use harvest_fetch::net::UrlPolicy;
use harvest_fetch::{HttpClientOptions, LimiterConfig, RetryPolicy, TransferOptions};
use serde::{Deserialize, Serialize};

use crate::error::{AcquireError, Result};
use crate::strategy::DownloadSpec;

pub const DEFAULT_BUCKET: &str = "yellow";
pub const DEFAULT_POOL: &str = "quarantine";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let client = HttpClientOptions::default();
        Self {
            connect_timeout_secs: client.connect_timeout.as_secs(),
            read_timeout_secs: client.read_timeout.as_secs(),
            user_agent: client.user_agent,
        }
    }
}

impl HttpSettings {
    pub fn client_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// The `globals` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Globals {
    pub raw_root: PathBuf,
    pub manifests_root: PathBuf,
    pub logs_root: PathBuf,
    pub default_bucket: String,
    pub default_pool: String,
    pub max_bytes_per_run: Option<u64>,
    pub allow_non_global_hosts: bool,
    /// Hostname suffixes and CIDR blocks exempt from the non-global check.
    pub mirror_allowlist: Vec<String>,
    pub retry: RetryPolicy,
    pub http: HttpSettings,
    /// Per-resolver overrides of the built-in limiter defaults.
    pub rate_limits: HashMap<String, LimiterConfig>,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            raw_root: PathBuf::from("raw"),
            manifests_root: PathBuf::from("manifests"),
            logs_root: PathBuf::from("logs"),
            default_bucket: DEFAULT_BUCKET.to_string(),
            default_pool: DEFAULT_POOL.to_string(),
            max_bytes_per_run: None,
            allow_non_global_hosts: false,
            mirror_allowlist: Vec::new(),
            retry: RetryPolicy::default(),
            http: HttpSettings::default(),
            rate_limits: HashMap::new(),
        }
    }
}

impl Globals {
    /// Anchor relative roots at `base`.
    pub fn rebase(mut self, base: &Path) -> Self {
        for root in [&mut self.raw_root, &mut self.manifests_root, &mut self.logs_root] {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        self
    }
}

/// Output classification of a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub pool: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLimits {
    #[serde(default)]
    pub max_files: Option<u64>,
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

/// One declared acquisition target.
#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    pub id: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub download: DownloadSpec,
    #[serde(default)]
    pub output: OutputSpec,
    #[serde(default)]
    pub limits: TargetLimits,
}

fn enabled_by_default() -> bool { true }

impl Target {
    pub fn new(id: impl Into<String>, download: DownloadSpec) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            download,
            output: OutputSpec::default(),
            limits: TargetLimits::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn limits(mut self, max_files: Option<u64>, max_bytes: Option<u64>) -> Self {
        self.limits = TargetLimits { max_files, max_bytes };
        self
    }

    pub fn output(mut self, bucket: Option<&str>, pool: Option<&str>) -> Self {
        self.output = OutputSpec {
            bucket: bucket.map(str::to_string),
            pool: pool.map(str::to_string),
        };
        self
    }
}

/// A config file: `globals` plus `targets`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub globals: Globals,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl ConfigFile {
    /// Read a TOML or JSON config, chosen by extension. Relative roots are
    /// resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| AcquireError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Format::Toml,
            Some("json") => Format::Json,
            other => {
                return Err(AcquireError::Config(format!(
                    "unsupported config extension {other:?} for '{}'",
                    path.display()
                )));
            }
        };
        let mut config = Self::parse(&text, format).map_err(|e| match e {
            AcquireError::Parse { message, .. } => AcquireError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.globals = config.globals.rebase(base);
        Ok(config)
    }

    pub fn parse(text: &str, format: Format) -> Result<Self> {
        let parsed: Self = match format {
            Format::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        }
        .map_err(|message| AcquireError::Parse {
            path: PathBuf::new(),
            message,
        })?;
        ensure_unique_ids(&parsed.targets)?;
        Ok(parsed)
    }

    /// Append targets from a queue, keeping ids unique.
    pub fn extend_targets(&mut self, targets: Vec<Target>) -> Result<()> {
        self.targets.extend(targets);
        ensure_unique_ids(&self.targets)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

/// Ids must be unique once reduced to the path component used for their
/// output and manifest directories.
fn ensure_unique_ids(targets: &[Target]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for target in targets {
        if target.id.trim().is_empty() {
            return Err(AcquireError::Config("target with an empty id".into()));
        }
        let component = harvest_fs::safe_component(&target.id)
            .map_err(|_| AcquireError::Config(format!("target id '{}' is not a usable directory name", target.id)))?;
        if let Some(first) = seen.insert(component.clone(), &target.id) {
            if first == target.id {
                return Err(AcquireError::Config(format!("duplicate target id '{}'", target.id)));
            }
            return Err(AcquireError::Config(format!(
                "target ids '{first}' and '{}' both map to directory '{component}'",
                target.id
            )));
        }
    }
    Ok(())
}

/// Parse a JSON-lines target queue. Blank lines are skipped; line numbers in
/// errors are 1-based.
pub fn parse_queue(text: &str) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let target = serde_json::from_str(line).map_err(|source| AcquireError::Queue {
            line: index + 1,
            source,
        })?;
        targets.push(target);
    }
    Ok(targets)
}

pub fn load_queue(path: impl AsRef<Path>) -> Result<Vec<Target>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| AcquireError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_queue(&text)
}

/// Per-run switches, normally from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFlags {
    pub execute: bool,
    pub overwrite: bool,
    pub resume: bool,
    pub verify_checksums: bool,
    pub workers: usize,
    pub strict: bool,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            execute: false,
            overwrite: false,
            resume: true,
            verify_checksums: true,
            workers: 1,
            strict: false,
        }
    }
}

impl RunFlags {
    pub fn execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Everything a run reads; built once and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub globals: Globals,
    pub flags: RunFlags,
}

impl RunConfig {
    pub fn new(globals: Globals, flags: RunFlags) -> Self { Self { globals, flags } }

    pub fn url_policy(&self) -> Result<UrlPolicy> {
        UrlPolicy::default()
            .allow_non_global(self.globals.allow_non_global_hosts)
            .with_allowlist(&self.globals.mirror_allowlist)
            .map_err(|e| AcquireError::Config(e.to_string()))
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions::default()
            .resume(self.flags.resume)
            .verify_checksums(self.flags.verify_checksums)
            .io_timeout(Duration::from_secs(self.globals.http.read_timeout_secs))
    }

    pub fn bucket<'a>(&'a self, target: &'a Target) -> &'a str {
        target.output.bucket.as_deref().unwrap_or(&self.globals.default_bucket)
    }

    pub fn pool<'a>(&'a self, target: &'a Target) -> &'a str {
        target.output.pool.as_deref().unwrap_or(&self.globals.default_pool)
    }

    /// `<raw_root>/<bucket>/<pool>/<id>`.
    pub fn output_dir(&self, target: &Target) -> Result<PathBuf> {
        Ok(self
            .globals
            .raw_root
            .join(harvest_fs::safe_component(self.bucket(target))?)
            .join(harvest_fs::safe_component(self.pool(target))?)
            .join(harvest_fs::safe_component(&target.id)?))
    }

    /// `<manifests_root>/<id>`.
    pub fn manifest_dir(&self, target: &Target) -> Result<PathBuf> {
        Ok(self.globals.manifests_root.join(harvest_fs::safe_component(&target.id)?))
    }
}
