//! The per-file path every download-based strategy shares: cache check,
//! budget admission, transfer, budget commit.

use std::path::{Path, PathBuf};

use harvest_fetch::{ErrorKind, FetchError, TargetBudget, TransferRequest, TransferResult};
use harvest_verify::Sha256Digest;
use regex::Regex;
use url::Url;

use crate::context::AcquireContext;
use crate::error::{AcquireError, Result};

/// Append `segments` to the path of `endpoint`, escaping each one.
pub(crate) fn endpoint_url<'a>(endpoint: &str, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| AcquireError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
    url.path_segments_mut()
        .map_err(|()| AcquireError::Config(format!("endpoint '{endpoint}' cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Shell-style name filters: `*` matches any run of characters (including
/// `/`), `?` exactly one. An empty set matches everything.
#[derive(Debug, Clone, Default)]
pub struct GlobSet(Vec<Regex>);

impl GlobSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        patterns
            .iter()
            .map(|pattern| compile_glob(pattern.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(GlobSet)
    }

    pub fn matches(&self, name: &str) -> bool { self.0.is_empty() || self.0.iter().any(|re| re.is_match(name)) }
}

fn compile_glob(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| AcquireError::Config(format!("invalid pattern '{pattern}': {e}")))
}

/// Map a remote relative name onto a path under `root`, one sanitized
/// component per segment. `..` is rejected.
pub(crate) fn local_path(root: &Path, name: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(AcquireError::InvalidResponse {
                    url: name.to_string(),
                    message: "remote file name escapes the output directory".into(),
                });
            }
            segment => {
                path.push(harvest_fs::safe_component(segment)?);
                pushed = true;
            }
        }
    }
    if !pushed {
        return Err(AcquireError::InvalidResponse {
            url: name.to_string(),
            message: "empty remote file name".into(),
        });
    }
    Ok(path)
}

pub(crate) fn parse_sha256(raw: Option<&str>) -> Result<Option<Sha256Digest>> {
    raw.map(|hex| {
        hex.trim()
            .parse()
            .map_err(|e| AcquireError::Config(format!("invalid sha256 '{hex}': {e}")))
    })
    .transpose()
}

/// One remote file to fetch.
#[derive(Debug, Clone)]
pub(crate) struct FileJob {
    pub url: String,
    pub dest: PathBuf,
    pub expected_size: Option<u64>,
    pub expected_sha256: Option<Sha256Digest>,
    pub headers: Vec<(String, String)>,
    /// Set on every result, e.g. a resolved dataset revision.
    pub commit: Option<String>,
}

impl FileJob {
    pub fn new(url: impl Into<String>, dest: PathBuf) -> Self {
        Self {
            url: url.into(),
            dest,
            expected_size: None,
            expected_sha256: None,
            headers: Vec::new(),
            commit: None,
        }
    }

    pub fn size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }

    pub fn sha256(mut self, sha256: Option<Sha256Digest>) -> Self {
        self.expected_sha256 = sha256;
        self
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn commit(mut self, commit: Option<String>) -> Self {
        self.commit = commit;
        self
    }

    fn label(&self) -> String {
        self.dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.url.clone())
    }

    fn planned(&self) -> TransferResult { TransferResult::planned(&self.url, Some(self.dest.clone())) }
}

#[derive(Debug, Clone)]
pub(crate) enum Protocol {
    Http,
    Ftp { credentials: Option<(String, String)> },
}

/// Fetches a target's files in order against one [`TargetBudget`].
pub(crate) struct Downloader<'a> {
    ctx: &'a AcquireContext,
    budget: TargetBudget,
    resolver: &'static str,
    protocol: Protocol,
}

impl<'a> Downloader<'a> {
    pub fn new(ctx: &'a AcquireContext, budget: TargetBudget, resolver: &'static str) -> Self {
        Self {
            ctx,
            budget,
            resolver,
            protocol: Protocol::Http,
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Fetch `jobs` in order. A budget limit or a stopped run ends the loop;
    /// results gathered so far are kept.
    pub async fn fetch_all(&self, jobs: Vec<FileJob>) -> Vec<TransferResult> {
        if !self.ctx.config().flags.execute {
            return jobs.iter().map(FileJob::planned).collect();
        }
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = self.fetch(&job).await;
            let halt = matches!(result.error_kind, Some(ErrorKind::LimitExceeded | ErrorKind::Cancelled));
            results.push(result);
            if halt {
                tracing::info!(target_id = self.budget.label(), "stopping further files of this target");
                break;
            }
        }
        results
    }

    pub async fn fetch(&self, job: &FileJob) -> TransferResult {
        let result = self.fetch_inner(job).await;
        match job.commit.clone() {
            Some(commit) => result.with_commit(commit),
            None => result,
        }
    }

    async fn fetch_inner(&self, job: &FileJob) -> TransferResult {
        let label = job.label();
        if !self.ctx.config().flags.overwrite {
            match cached(job).await {
                Ok(Some(result)) => {
                    tracing::debug!(target_id = self.budget.label(), path = %job.dest.display(), "cached");
                    return result;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %job.dest.display(), error = %e, "could not inspect existing file"),
            }
        }
        if self.ctx.stop().is_cancelled() && !self.ctx.run_budget().is_exhausted() {
            return failure(job, ErrorKind::Cancelled, "run stopped");
        }

        let admitted = self.budget.start_file(&label).and_then(|()| match job.expected_size {
            Some(size) => self.budget.check_size_hint(size, &label),
            None => Ok(()),
        });
        if let Err(e) = admitted {
            return failure(job, ErrorKind::LimitExceeded, e.to_string());
        }

        let request = TransferRequest::new(&job.url, &job.dest)
            .expected_size(job.expected_size)
            .expected_sha256(job.expected_sha256)
            .headers(job.headers.clone());
        let cap = self.budget.remaining();
        let outcome = match &self.protocol {
            Protocol::Http => self.ctx.http_transfer(self.resolver).fetch(&request, cap).await,
            Protocol::Ftp { credentials } => {
                let mut transfer = self.ctx.ftp_transfer(self.resolver);
                if let Some((user, password)) = credentials {
                    transfer = transfer.with_credentials(user.as_str(), password.as_str());
                }
                transfer.fetch(&request, cap).await
            }
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(target_id = self.budget.label(), url = %job.url, error = %e, "transfer failed");
                return failure(job, e.kind(), e.to_string());
            }
        };

        if let Err(e) = self.budget.record_bytes(outcome.bytes, &label) {
            if let Err(discard) = harvest_fs::discard(&outcome.path) {
                tracing::warn!(path = %outcome.path.display(), error = %discard, "failed to remove over-budget file");
            }
            return failure(job, ErrorKind::LimitExceeded, e.to_string());
        }
        TransferResult::ok(&job.url, &outcome)
    }
}

fn failure(job: &FileJob, kind: ErrorKind, message: impl Into<String>) -> TransferResult {
    TransferResult::error(kind, message)
        .for_url(&job.url)
        .at_path(job.dest.clone())
}

/// A destination that already satisfies the declared size and checksum, or
/// exists non-empty when neither is declared.
async fn cached(job: &FileJob) -> Result<Option<TransferResult>> {
    let meta = match tokio::fs::metadata(&job.dest).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return Ok(None),
    };
    if job.expected_size.is_some_and(|size| size != meta.len()) {
        return Ok(None);
    }
    if job.expected_size.is_none() && job.expected_sha256.is_none() && meta.len() == 0 {
        return Ok(None);
    }
    let dest = job.dest.clone();
    let (digest, bytes) = tokio::task::spawn_blocking(move || harvest_verify::sha256_file(dest))
        .await
        .map_err(|e| AcquireError::Io(std::io::Error::other(e)))??;
    if let Some(expected) = &job.expected_sha256 {
        if expected.verify(&digest).is_err() {
            return Ok(None);
        }
    }
    Ok(Some(TransferResult::cached(
        Some(job.url.clone()),
        job.dest.clone(),
        bytes,
        Some(hex::encode(&digest)),
    )))
}

/// Account for files a tool wrote under `root`, in sorted order.
///
/// The first file that does not fit is deleted together with every file
/// after it, and reported as one `limit_exceeded` result.
pub(crate) async fn record_tree(
    budget: &TargetBudget,
    root: &Path,
    source: &str,
    skip_dirs: &[&str],
) -> Result<Vec<TransferResult>> {
    let files = harvest_fs::list_files(root, skip_dirs)?;
    let mut results = Vec::with_capacity(files.len());
    let mut overflow: Option<(usize, FetchError)> = None;
    for (index, file) in files.iter().enumerate() {
        let relative = file.strip_prefix(root).unwrap_or(file).to_string_lossy().replace('\\', "/");
        let path = file.clone();
        let (digest, bytes) = tokio::task::spawn_blocking(move || harvest_verify::sha256_file(path))
            .await
            .map_err(|e| AcquireError::Io(std::io::Error::other(e)))??;
        let admitted = budget
            .start_file(&relative)
            .and_then(|()| budget.record_bytes(bytes, &relative));
        if let Err(e) = admitted {
            overflow = Some((index, e.into()));
            break;
        }
        results.push(TransferResult::produced(
            format!("{source}/{relative}"),
            file.clone(),
            bytes,
            Some(hex::encode(&digest)),
        ));
    }
    if let Some((index, err)) = overflow {
        for file in &files[index..] {
            harvest_fs::discard(file)?;
        }
        results.push(TransferResult::error(ErrorKind::LimitExceeded, err.to_string()).for_url(source));
    }
    Ok(results)
}
