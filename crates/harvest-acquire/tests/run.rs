use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use harvest_acquire::strategy::HttpParams;
use harvest_acquire::{
    AcquireContext, DownloadSpec, Globals, MANIFEST_FILE, Manifest, Result, RunConfig, RunFlags, RunScheduler,
    RunSummary, StrategyHandler, StrategyKind, StrategyRegistry, Target,
};
use harvest_fetch::net::StaticResolver;
use harvest_fetch::testing::{MockHttpClient, MockRoute};
use harvest_fetch::{ErrorKind, ManualClock, TransferResult, TransferStatus};

const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn globals(root: &Path) -> Globals {
    Globals {
        raw_root: root.join("raw"),
        manifests_root: root.join("manifests"),
        logs_root: root.join("logs"),
        ..Globals::default()
    }
}

fn context(globals: Globals, flags: RunFlags, client: Arc<MockHttpClient>) -> Arc<AcquireContext> {
    let ip = |s: &str| s.parse::<IpAddr>().unwrap();
    let resolver = StaticResolver::new()
        .with("example.org", &[ip("93.184.216.34")])
        .with("cdn.example", &[ip("93.184.216.35")])
        .with("private.example", &[ip("10.0.0.5")]);
    let ctx = AcquireContext::builder(RunConfig::new(globals, flags))
        .http_client(client)
        .resolver(Arc::new(resolver))
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    Arc::new(ctx)
}

fn http(id: &str, urls: &[&str]) -> Target {
    Target::new(
        id,
        DownloadSpec::Http(HttpParams {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            ..HttpParams::default()
        }),
    )
}

fn hello(id: &str) -> Target {
    Target::new(
        id,
        DownloadSpec::Http(HttpParams {
            url: Some("https://example.org/hello.txt".into()),
            expected_sha256: Some(HELLO_SHA.into()),
            ..HttpParams::default()
        }),
    )
}

fn scheduler() -> RunScheduler { RunScheduler::new(Arc::new(StrategyRegistry::builtin())) }

fn manifest(root: &Path, id: &str) -> Manifest {
    Manifest::load(&root.join("manifests").join(id).join(MANIFEST_FILE)).unwrap()
}

fn summary_files(root: &Path) -> usize {
    std::fs::read_dir(root.join("logs"))
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_plan_mode_is_offline() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockHttpClient::new());
    let ctx = context(globals(dir.path()), RunFlags::default(), client.clone());

    let targets = vec![
        hello("hello"),
        Target::new("manual", DownloadSpec::None),
        http("off", &["https://example.org/off.bin"]).enabled(false),
    ];
    let summary = scheduler().run(ctx, targets).await;

    assert!(client.calls().is_empty());
    assert!(!dir.path().join("raw").exists());
    assert_eq!(summary.targets_total, 3);
    assert_eq!(summary.targets_disabled, 1);
    assert_eq!(summary.counts["planned"], 1);
    assert_eq!(summary.counts["noop"], 1);
    assert!(!summary.execute);
    assert_eq!(summary.exit_code(true), 0);
    assert_eq!(summary_files(dir.path()), 1);

    let planned = manifest(dir.path(), "hello");
    assert_eq!(planned.results[0].status, TransferStatus::Planned);
    assert!(!dir.path().join("manifests/hello/acquire_done.json").exists());
    assert!(!dir.path().join("manifests/off").exists());
}

#[tokio::test]
async fn test_round_trip_then_cached() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockHttpClient::new());
    client.route("https://example.org/hello.txt", MockRoute::ok(b"hello"));
    let flags = RunFlags::default().execute(true);

    let first = scheduler()
        .run(context(globals(dir.path()), flags.clone(), client.clone()), vec![hello("hello")])
        .await;
    assert_eq!(first.counts["ok"], 1);
    assert_eq!(first.bytes_consumed, 5);
    let payload = dir.path().join("raw/yellow/quarantine/hello/hello.txt");
    assert_eq!(std::fs::read(&payload).unwrap(), b"hello");
    assert!(dir.path().join("manifests/hello/acquire_done.json").exists());

    let second = scheduler()
        .run(context(globals(dir.path()), flags.clone(), client.clone()), vec![hello("hello")])
        .await;
    assert_eq!(second.counts["cached"], 1);
    assert_eq!(second.bytes_consumed, 0);
    assert_eq!(client.call_count("https://example.org/hello.txt"), 1);

    // two cached runs agree on everything but time
    let cached_a = manifest(dir.path(), "hello");
    scheduler()
        .run(context(globals(dir.path()), flags, client.clone()), vec![hello("hello")])
        .await;
    let cached_b = manifest(dir.path(), "hello");
    assert_eq!(cached_a.results, cached_b.results);
    assert_eq!(cached_a.status, cached_b.status);
    assert_eq!(cached_a.output_dir, cached_b.output_dir);
    assert_eq!(cached_b.results[0].sha256.as_deref(), Some(HELLO_SHA));
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockHttpClient::new());
    client.route("https://example.org/hello.txt", MockRoute::ok(b"hello!"));
    let flags = RunFlags {
        strict: true,
        ..RunFlags::default().execute(true)
    };

    let summary = scheduler()
        .run(context(globals(dir.path()), flags, client), vec![hello("hello")])
        .await;

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.exit_code(true), 1);
    assert_eq!(summary.exit_code(false), 0);
    let results = manifest(dir.path(), "hello").results;
    assert_eq!(results[0].error_kind, Some(ErrorKind::Sha256Mismatch));
    assert!(!dir.path().join("raw/yellow/quarantine/hello/hello.txt").exists());
}

#[tokio::test]
async fn test_run_budget_stops_new_targets() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockHttpClient::new());
    client.route("https://example.org/x.bin", MockRoute::ok(b"xxxxx"));
    client.route("https://example.org/y.bin", MockRoute::ok(b"yyyyy"));
    client.route("https://example.org/z.bin", MockRoute::ok(b"zzz"));
    client.route("https://example.org/w.bin", MockRoute::ok(b"w"));
    let globals = Globals {
        max_bytes_per_run: Some(8),
        ..globals(dir.path())
    };

    let targets = vec![
        http("first", &["https://example.org/x.bin", "https://example.org/y.bin"]),
        http("second", &["https://example.org/z.bin"]),
        http("third", &["https://example.org/w.bin"]),
    ];
    let summary = scheduler()
        .run(context(globals, RunFlags::default().execute(true), client.clone()), targets)
        .await;

    assert_eq!(summary.bytes_consumed, 8);
    assert_eq!(summary.not_started, vec!["third".to_string()]);
    assert_eq!(client.call_count("https://example.org/w.bin"), 0);

    let first = manifest(dir.path(), "first").results;
    assert_eq!(first[0].status, TransferStatus::Ok);
    assert_eq!(first[1].error_kind, Some(ErrorKind::LimitExceeded));
    assert!(!dir.path().join("raw/yellow/quarantine/first/y.bin").exists());
    assert_eq!(manifest(dir.path(), "second").status, TransferStatus::Ok);

    let ok_bytes: u64 = summary.targets.iter().map(|t| t.bytes).sum();
    assert!(ok_bytes <= 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_stops_dispatch_once_run_budget_is_spent() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockHttpClient::new());
    for name in ["a", "b", "c", "d"] {
        client.route(&format!("https://example.org/{name}.bin"), MockRoute::ok(&[1u8; 8]));
    }
    let globals = Globals {
        max_bytes_per_run: Some(8),
        ..globals(dir.path())
    };
    let targets = ["a", "b", "c", "d"]
        .iter()
        .map(|name| http(name, &[&format!("https://example.org/{name}.bin")]))
        .collect();

    let flags = RunFlags::default().execute(true).workers(2);
    let summary = scheduler().run(context(globals, flags, client.clone()), targets).await;

    // a and b share the first two slots; whichever commits first spends the
    // whole budget, so no later slot is handed out.
    assert_eq!(summary.bytes_consumed, 8);
    assert_eq!(summary.not_started, vec!["c".to_string(), "d".to_string()]);
    assert_eq!(client.call_count("https://example.org/c.bin"), 0);
    assert_eq!(client.call_count("https://example.org/d.bin"), 0);

    let ids: Vec<&str> = summary.targets.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    let ok = summary.targets.iter().filter(|t| t.status == TransferStatus::Ok).count();
    assert_eq!(ok, 1);
    // the other one is refused by the budget, or stopped mid-stream by it
    let refused = ["a", "b"]
        .iter()
        .flat_map(|id| manifest(dir.path(), id).results)
        .filter(|r| matches!(r.error_kind, Some(ErrorKind::LimitExceeded | ErrorKind::Cancelled)))
        .count();
    assert_eq!(refused, 1);
    assert!(!dir.path().join("manifests/c").exists());
}

#[tokio::test]
async fn test_redirect_through_private_host_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockHttpClient::new());
    client.route("https://example.org/a", MockRoute::redirect("http://private.example/b"));
    client.route("http://private.example/b", MockRoute::redirect("https://cdn.example/c"));
    client.route("https://cdn.example/c", MockRoute::ok(b"secret"));

    let summary = scheduler()
        .run(
            context(globals(dir.path()), RunFlags::default().execute(true), client.clone()),
            vec![http("hop", &["https://example.org/a"])],
        )
        .await;

    assert_eq!(summary.counts["error"], 1);
    let results = manifest(dir.path(), "hop").results;
    assert_eq!(results[0].error_kind, Some(ErrorKind::BlockedUrl));
    assert!(results[0].error.as_deref().unwrap().contains("private.example"));
    assert_eq!(client.call_count("http://private.example/b"), 0);
    assert_eq!(client.call_count("https://cdn.example/c"), 0);
}

struct Exploding;

#[async_trait]
impl StrategyHandler for Exploding {
    fn kind(&self) -> StrategyKind { StrategyKind::Git }

    async fn run(&self, _: &AcquireContext, target: &Target, _: &Path) -> Result<Vec<TransferResult>> {
        panic!("boom in {}", target.id)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_contains_panics_and_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockHttpClient::new());
    client.route("https://example.org/hello.txt", MockRoute::ok(b"hello"));
    let registry = StrategyRegistry::builtin().register(Exploding);
    let flags = RunFlags::default().execute(true).workers(3);

    let git: Target = serde_json::from_str(
        r#"{"id": "repo", "download": {"strategy": "git", "repo_url": "https://example.org/r.git"}}"#,
    )
    .unwrap();
    let targets = vec![
        git,
        hello("hello"),
        Target::new("manual", DownloadSpec::None),
    ];
    let summary: RunSummary = RunScheduler::new(Arc::new(registry))
        .run(context(globals(dir.path()), flags, client), targets)
        .await;

    let ids: Vec<&str> = summary.targets.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["repo", "hello", "manual"]);
    assert_eq!(summary.targets[0].error.as_deref(), Some("handler_panicked: boom in repo"));
    assert_eq!(summary.targets[1].status, TransferStatus::Ok);
    assert_eq!(summary.targets[2].status, TransferStatus::Noop);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(manifest(dir.path(), "repo").results[0].error_kind, Some(ErrorKind::HandlerPanicked));
}
