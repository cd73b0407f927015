//! SSRF policy for outbound URLs and every redirect hop.
//!
//! A URL passes when its scheme is http(s), it has a host, the host resolves,
//! and either non-global hosts are allowed, the host matches an allowlisted
//! suffix, or every resolved address is globally routable or inside an
//! allowlisted CIDR. Hops are judged independently of each other.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::{Host, Url};

use crate::error::{FetchError, Result};

#[derive(Debug, Error)]
#[error("invalid allowlist entry: '{0}'")]
pub struct InvalidAllowEntry(pub String);

/// An IP network in prefix notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn new(network: IpAddr, prefix: u8) -> Option<Self> {
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (prefix <= max).then_some(Self { network, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for Cidr {
    type Err = InvalidAllowEntry;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || InvalidAllowEntry(s.to_string());
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let network: IpAddr = addr.trim().parse().map_err(|_| invalid())?;
        let prefix = match prefix {
            Some(p) => p.trim().parse().map_err(|_| invalid())?,
            None if network.is_ipv4() => 32,
            None => 128,
        };
        Cidr::new(network, prefix).ok_or_else(invalid)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// One mirror allowlist entry: an IP network, or a hostname suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowEntry {
    HostSuffix(String),
    Cidr(Cidr),
}

impl AllowEntry {
    fn matches_host(&self, host: &str) -> bool {
        match self {
            AllowEntry::HostSuffix(suffix) => {
                host == suffix
                    || host
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            AllowEntry::Cidr(_) => false,
        }
    }
}

impl FromStr for AllowEntry {
    type Err = InvalidAllowEntry;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(cidr) = trimmed.parse::<Cidr>() {
            return Ok(AllowEntry::Cidr(cidr));
        }
        if trimmed.contains('/') {
            return Err(InvalidAllowEntry(s.to_string()));
        }
        let suffix = trimmed.trim_start_matches('.').trim_end_matches('.').to_ascii_lowercase();
        if suffix.is_empty() || suffix.contains(char::is_whitespace) {
            return Err(InvalidAllowEntry(s.to_string()));
        }
        Ok(AllowEntry::HostSuffix(suffix))
    }
}

/// Run-wide SSRF settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlPolicy {
    pub allow_non_global: bool,
    pub allowlist: Vec<AllowEntry>,
}

impl UrlPolicy {
    pub fn allow_non_global(mut self, allow: bool) -> Self {
        self.allow_non_global = allow;
        self
    }

    pub fn allow(mut self, entry: AllowEntry) -> Self {
        self.allowlist.push(entry);
        self
    }

    /// Parse configured allowlist strings.
    pub fn with_allowlist<S: AsRef<str>>(
        mut self,
        entries: &[S],
    ) -> std::result::Result<Self, InvalidAllowEntry> {
        for entry in entries {
            self.allowlist.push(entry.as_ref().parse()?);
        }
        Ok(self)
    }

    fn host_allowlisted(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.allowlist.iter().any(|entry| entry.matches_host(&host))
    }

    fn ip_allowlisted(&self, ip: IpAddr) -> bool {
        self.allowlist.iter().any(|entry| match entry {
            AllowEntry::Cidr(cidr) => cidr.contains(ip),
            AllowEntry::HostSuffix(_) => false,
        })
    }
}

/// Decision for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl UrlVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Name resolution used by the validator.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>>;
}

/// System DNS through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioResolver;

#[async_trait]
impl HostResolver for TokioResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Fixed host table; unknown names fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, host: &str, ips: &[IpAddr]) -> Self {
        self.table.insert(host.to_ascii_lowercase(), ips.to_vec());
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> io::Result<Vec<IpAddr>> {
        self.table
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {host}")))
    }
}

/// Why `ip` is not globally routable, or `None` when it is.
pub fn non_global_reason(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => v4_reason(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4_reason(v4),
            None => v6_reason(v6),
        },
    }
}

pub fn is_global_ip(ip: IpAddr) -> bool { non_global_reason(ip).is_none() }

fn v4_reason(ip: Ipv4Addr) -> Option<&'static str> {
    let [a, b, c, _] = ip.octets();
    let reason = if a == 0 {
        "unspecified"
    } else if ip.is_loopback() {
        "loopback"
    } else if ip.is_private() {
        "private"
    } else if a == 100 && (64..128).contains(&b) {
        "shared address space"
    } else if ip.is_link_local() {
        "link-local"
    } else if ip.is_broadcast() {
        "broadcast"
    } else if ip.is_multicast() {
        "multicast"
    } else if ip.is_documentation() {
        "documentation"
    } else if a == 198 && (b == 18 || b == 19) {
        "benchmarking"
    } else if a >= 240 {
        "reserved"
    } else if a == 192 && b == 0 && c == 0 {
        "IETF protocol assignment"
    } else {
        return None;
    };
    Some(reason)
}

fn v6_reason(ip: Ipv6Addr) -> Option<&'static str> {
    let segments = ip.segments();
    let first = segments[0];
    let reason = if ip.is_unspecified() {
        "unspecified"
    } else if ip.is_loopback() {
        "loopback"
    } else if first & 0xff00 == 0xff00 {
        "multicast"
    } else if first & 0xfe00 == 0xfc00 {
        "unique-local"
    } else if first & 0xffc0 == 0xfe80 {
        "link-local"
    } else if first & 0xffc0 == 0xfec0 {
        "site-local"
    } else if first == 0x2001 && segments[1] == 0x0db8 {
        "documentation"
    } else if first == 0x0100 && segments[1..4] == [0, 0, 0] {
        "discard prefix"
    } else if first & 0xe000 != 0x2000 {
        "outside global unicast"
    } else {
        return None;
    };
    Some(reason)
}

/// Applies a [`UrlPolicy`] to URLs and redirect chains.
#[derive(Clone)]
pub struct UrlSafetyValidator {
    policy: UrlPolicy,
    resolver: Arc<dyn HostResolver>,
}

impl fmt::Debug for UrlSafetyValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSafetyValidator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl UrlSafetyValidator {
    pub fn new(policy: UrlPolicy, resolver: Arc<dyn HostResolver>) -> Self { Self { policy, resolver } }

    pub fn policy(&self) -> &UrlPolicy { &self.policy }

    pub async fn validate(&self, url: &str) -> UrlVerdict {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return UrlVerdict::block(format!("invalid URL: {e}")),
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return UrlVerdict::block(format!("scheme '{}' is not allowed", parsed.scheme()));
        }
        let Some(host) = parsed.host() else {
            return UrlVerdict::block("URL has no host");
        };
        let port = parsed.port_or_known_default().unwrap_or(443);
        self.validate_host(host, port).await
    }

    /// Host-level checks shared by every protocol that opens sockets.
    pub async fn validate_host(&self, host: Host<&str>, port: u16) -> UrlVerdict {
        let (name, ips) = match host {
            Host::Ipv4(ip) => (None, vec![IpAddr::V4(ip)]),
            Host::Ipv6(ip) => (None, vec![IpAddr::V6(ip)]),
            Host::Domain(domain) => match self.resolver.resolve(domain, port).await {
                Ok(ips) if !ips.is_empty() => (Some(domain), ips),
                Ok(_) => return UrlVerdict::block(format!("host '{domain}' has no addresses")),
                Err(e) => return UrlVerdict::block(format!("host '{domain}' does not resolve: {e}")),
            },
        };

        if self.policy.allow_non_global {
            return UrlVerdict::allow();
        }
        if name.is_some_and(|name| self.policy.host_allowlisted(name)) {
            return UrlVerdict::allow();
        }
        for ip in ips {
            if self.policy.ip_allowlisted(ip) {
                continue;
            }
            if let Some(reason) = non_global_reason(ip) {
                return UrlVerdict::block(format!("resolves to {reason} address {ip}"));
            }
        }
        UrlVerdict::allow()
    }

    /// [`validate`](Self::validate) as a `Result`.
    pub async fn check(&self, url: &str) -> Result<()> {
        let verdict = self.validate(url).await;
        if verdict.allowed {
            Ok(())
        } else {
            Err(FetchError::blocked(url, verdict.reason.unwrap_or_default()))
        }
    }

    /// Every hop must pass on its own; the first failing hop is reported.
    pub async fn validate_chain(&self, hops: &[String]) -> Result<()> {
        for hop in hops {
            self.check(hop).await?;
        }
        Ok(())
    }
}
