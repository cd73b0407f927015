//! Shared run state: configuration, the HTTP client, the SSRF validator,
//! limiters, the run byte budget, the tool runner and the stop token.

use std::collections::HashMap;
use std::sync::Arc;

use harvest_fetch::net::{HostResolver, TokioResolver, UrlSafetyValidator};
use harvest_fetch::{
    ByteBudget, Clock, FetchError, FtpTransfer, HttpClient, LimiterRegistry, ReqwestClient, ResumableTransfer,
    SystemClock, TargetBudget,
    core::{is_redirect, url_authority},
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{RunConfig, Target};
use crate::error::{AcquireError, Result};
use crate::tool::{TokioToolRunner, ToolRunner};

/// Metadata documents larger than this are rejected.
const MAX_METADATA_BYTES: usize = 16 * 1024 * 1024;

pub struct AcquireContext {
    config: RunConfig,
    http: Arc<dyn HttpClient>,
    validator: Arc<UrlSafetyValidator>,
    limiters: LimiterRegistry,
    run_budget: Arc<ByteBudget>,
    tools: Arc<dyn ToolRunner>,
    clock: Arc<dyn Clock>,
    stop: CancellationToken,
    tokens: HashMap<String, String>,
}

impl AcquireContext {
    pub fn builder(config: RunConfig) -> ContextBuilder {
        ContextBuilder {
            config,
            http: None,
            resolver: None,
            tools: None,
            clock: None,
            tokens: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RunConfig { &self.config }

    pub fn validator(&self) -> &Arc<UrlSafetyValidator> { &self.validator }

    pub fn limiters(&self) -> &LimiterRegistry { &self.limiters }

    pub fn run_budget(&self) -> &Arc<ByteBudget> { &self.run_budget }

    pub fn tools(&self) -> &dyn ToolRunner { self.tools.as_ref() }

    pub fn stop(&self) -> &CancellationToken { &self.stop }

    /// API token registered under `name` (`github`, `huggingface`).
    pub fn token(&self, name: &str) -> Option<&str> { self.tokens.get(name).map(String::as_str) }

    /// No new work should start.
    pub fn is_stopped(&self) -> bool { self.stop.is_cancelled() || self.run_budget.is_exhausted() }

    pub fn target_budget(&self, target: &Target) -> TargetBudget {
        TargetBudget::new(
            target.id.clone(),
            target.limits.max_files,
            target.limits.max_bytes,
            self.run_budget.clone(),
        )
    }

    /// HTTP transfer paced by the `resolver` limiter.
    pub fn http_transfer(&self, resolver: &str) -> ResumableTransfer {
        ResumableTransfer::new(self.http.clone(), self.validator.clone())
            .with_options(self.config.transfer_options())
            .with_retry(self.config.globals.retry.clone())
            .with_limiter(Some(self.limiters.get(resolver)))
            .with_clock(self.clock.clone())
            .with_stop(self.stop.clone())
    }

    pub fn ftp_transfer(&self, resolver: &str) -> FtpTransfer {
        FtpTransfer::new(self.validator.clone())
            .with_options(self.config.transfer_options())
            .with_retry(self.config.globals.retry.clone())
            .with_limiter(Some(self.limiters.get(resolver)))
            .with_clock(self.clock.clone())
            .with_stop(self.stop.clone())
    }

    /// GET a JSON metadata document, validating every redirect hop.
    ///
    /// Metadata calls take one limiter token and are not retried.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(String, String)],
        resolver: &str,
    ) -> Result<T> {
        let limiter = self.limiters.get(resolver);
        if limiter.acquire_cancellable(1, &self.stop).await.is_none() {
            return Err(AcquireError::Cancelled);
        }

        let origin = Url::parse(url).ok().and_then(|u| url_authority(&u));
        let mut current = url.to_string();
        let max_redirects = self.config.transfer_options().max_redirects;
        for _ in 0..=max_redirects {
            self.validator.check(&current).await?;
            // Credentials stay on the host they were issued for.
            let same_origin = Url::parse(&current).ok().and_then(|u| url_authority(&u)) == origin;
            let hop_headers: Vec<(String, String)> = headers
                .iter()
                .filter(|(name, _)| same_origin || !name.eq_ignore_ascii_case("authorization"))
                .cloned()
                .collect();
            let response = tokio::select! {
                _ = self.stop.cancelled() => return Err(AcquireError::Cancelled),
                response = self.http.get(&current, &hop_headers) => response?,
            };
            if is_redirect(response.status) {
                let next = response
                    .header("location")
                    .and_then(|location| Url::parse(&current).ok()?.join(location).ok())
                    .ok_or_else(|| FetchError::MissingLocation(current.clone()))?;
                tracing::debug!(from = %current, to = %next, "metadata redirect");
                current = next.to_string();
                continue;
            }
            if !response.is_success() {
                return Err(FetchError::HttpStatus {
                    status: response.status,
                    url: current,
                }
                .into());
            }
            let body = response.collect(MAX_METADATA_BYTES).await?;
            return serde_json::from_slice(&body).map_err(|source| AcquireError::Json { url: current, source });
        }
        Err(FetchError::TooManyRedirects(max_redirects).into())
    }
}

pub struct ContextBuilder {
    config: RunConfig,
    http: Option<Arc<dyn HttpClient>>,
    resolver: Option<Arc<dyn HostResolver>>,
    tools: Option<Arc<dyn ToolRunner>>,
    clock: Option<Arc<dyn Clock>>,
    tokens: HashMap<String, String>,
}

impl ContextBuilder {
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn tool_runner(mut self, tools: Arc<dyn ToolRunner>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn token(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tokens.insert(name.into(), value.into());
        self
    }

    /// Pick up `GITHUB_TOKEN` and `HF_TOKEN` from the environment.
    pub fn tokens_from_env(mut self) -> Self {
        for (name, var) in [("github", "GITHUB_TOKEN"), ("huggingface", "HF_TOKEN")] {
            match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => {
                    self.tokens.insert(name.to_string(), value.trim().to_string());
                }
                _ => {}
            }
        }
        self
    }

    pub fn build(self) -> Result<AcquireContext> {
        let policy = self.config.url_policy()?;
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(TokioResolver));
        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestClient::new(&self.config.globals.http.client_options())?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let stop = CancellationToken::new();
        let run_budget = Arc::new(ByteBudget::new(self.config.globals.max_bytes_per_run).with_stop(stop.clone()));
        let limiters = LimiterRegistry::with_clock(self.config.globals.rate_limits.clone(), clock.clone());

        Ok(AcquireContext {
            validator: Arc::new(UrlSafetyValidator::new(policy, resolver)),
            http,
            limiters,
            run_budget,
            tools: self.tools.unwrap_or_else(|| Arc::new(TokioToolRunner)),
            clock,
            stop,
            tokens: self.tokens,
            config: self.config,
        })
    }
}

/// Bearer header list for an optional token.
pub(crate) fn bearer(token: Option<&str>) -> Vec<(String, String)> {
    token
        .map(|token| vec![("Authorization".to_string(), format!("Bearer {token}"))])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use harvest_fetch::net::StaticResolver;
    use harvest_fetch::testing::{MockHttpClient, MockRoute};
    use serde_json::Value;

    use super::*;
    use crate::config::{Globals, RunFlags};

    fn context(client: Arc<MockHttpClient>) -> AcquireContext {
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();
        let resolver = StaticResolver::new()
            .with("api.example", &[ip("93.184.216.34")])
            .with("cdn.example", &[ip("93.184.216.35")])
            .with("intranet.example", &[ip("192.168.1.10")]);
        AcquireContext::builder(RunConfig::new(Globals::default(), RunFlags::default()))
            .http_client(client)
            .resolver(Arc::new(resolver))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_json_follows_safe_redirect() {
        let client = Arc::new(MockHttpClient::new());
        client.route("https://api.example/meta", MockRoute::redirect("https://cdn.example/meta.json"));
        client.route("https://cdn.example/meta.json", MockRoute::json(r#"{"files": 2}"#));
        let ctx = context(client);

        let value: Value = ctx.get_json("https://api.example/meta", &[], "http").await.unwrap();
        assert_eq!(value["files"], 2);
    }

    #[tokio::test]
    async fn test_get_json_blocks_private_redirect() {
        let client = Arc::new(MockHttpClient::new());
        client.route("https://api.example/meta", MockRoute::redirect("https://intranet.example/meta"));
        let ctx = context(client.clone());

        let err = ctx.get_json::<Value>("https://api.example/meta", &[], "http").await.unwrap_err();
        assert!(matches!(err, AcquireError::Fetch(FetchError::BlockedUrl { .. })));
        assert_eq!(client.call_count("https://intranet.example/meta"), 0);
    }

    #[tokio::test]
    async fn test_get_json_status_and_decode_errors() {
        let client = Arc::new(MockHttpClient::new());
        client.route("https://api.example/bad", MockRoute::json("not json"));
        let ctx = context(client);

        let err = ctx.get_json::<Value>("https://api.example/missing", &[], "http").await.unwrap_err();
        assert!(matches!(err, AcquireError::Fetch(FetchError::HttpStatus { status: 404, .. })));
        let err = ctx.get_json::<Value>("https://api.example/bad", &[], "http").await.unwrap_err();
        assert!(matches!(err, AcquireError::Json { .. }));
    }

    #[tokio::test]
    async fn test_get_json_drops_token_on_cross_host_redirect() {
        let client = Arc::new(MockHttpClient::new());
        client.route("https://api.example/meta", MockRoute::redirect("https://cdn.example/meta.json"));
        client.route("https://cdn.example/meta.json", MockRoute::json(r#"{"files": 1}"#));
        let ctx = context(client.clone());

        let headers = bearer(Some("ghp_secret"));
        let _: Value = ctx.get_json("https://api.example/meta", &headers, "github").await.unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].header("authorization"), Some("Bearer ghp_secret"));
        assert_eq!(calls[1].url, "https://cdn.example/meta.json");
        assert_eq!(calls[1].header("authorization"), None);
    }

    #[tokio::test]
    async fn test_get_json_keeps_token_on_same_host_redirect() {
        let client = Arc::new(MockHttpClient::new());
        client.route("https://api.example/meta", MockRoute::redirect("/v2/meta"));
        client.route("https://api.example/v2/meta", MockRoute::json(r#"{"files": 1}"#));
        let ctx = context(client.clone());

        let _: Value = ctx.get_json("https://api.example/meta", &bearer(Some("t0k")), "github").await.unwrap();
        assert_eq!(client.calls()[1].header("authorization"), Some("Bearer t0k"));
    }

    #[test]
    fn test_bearer() {
        assert!(bearer(None).is_empty());
        assert_eq!(bearer(Some("t0k"))[0].1, "Bearer t0k");
    }
}
