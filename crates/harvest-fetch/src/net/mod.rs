//! Network effects: the HTTP client seam, the SSRF validator and FTP.

pub mod ftp;
mod http;
mod ssrf;

pub use http::{BoxStream, HttpClient, HttpClientOptions, HttpResponse};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use ssrf::{
    AllowEntry, Cidr, HostResolver, InvalidAllowEntry, StaticResolver, TokioResolver, UrlPolicy,
    UrlSafetyValidator, UrlVerdict, is_global_ip, non_global_reason,
};
